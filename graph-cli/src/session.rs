use std::collections::HashMap;
use std::io::BufRead;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use colored::Colorize;
use log::{debug, info};
use rustyline::config::Builder;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{CompletionType, Editor};

use graph_rs::iter::GraphIter;
use graph_rs::mvcc::engine::{Engine, SingleNodeEngine};
use graph_rs::mvcc::Transaction;
use graph_rs::storage::graph::Graph;
use graph_rs::storage::property::Value;
use graph_rs::storage::{EdgeTypeId, Gid, LabelId, PropertyId};

use crate::config::ConfigLoad;

const DEFAULT_PROMPT: &str = "graphcli";

const HELP: &str = "\
commands:
  VERTEX                      create a vertex
  EDGE <from> <to> <type>     create an edge between two vertices
  LABEL <gid> <label>         add a label to a vertex
  UNLABEL <gid> <label>       remove a label from a vertex
  HAS <gid> <label>           check a label
  SET <gid> <key> <value>     set a vertex property
  GET <gid> <key>             read a vertex property
  DEGREE <gid>                in plus out degree of a vertex
  REMOVE <gid>                remove a vertex and its edges
  LIST [label]                list visible vertices
  STATS                       storage and engine counters
  GC                          reclaim unreachable record versions
  EXIT                        leave";

/// An interactive session over an in-process engine and graph. Every command
/// runs in its own transaction and commits on success; a serialization
/// conflict aborts and surfaces as a plain error.
pub struct Session {
    is_repl: bool,
    settings: ConfigLoad,
    engine: SingleNodeEngine,
    graph: Graph,

    // Interned names. The storage only knows numeric ids.
    labels: HashMap<String, LabelId>,
    edge_types: HashMap<String, EdgeTypeId>,
    properties: HashMap<String, PropertyId>,

    commands_run: u64,
}

impl Session {
    pub async fn try_new(settings: ConfigLoad, is_repl: bool) -> Result<Self> {
        if is_repl {
            println!("Welcome to graphcli.");
            println!();
        }

        let graph = Graph::new(settings.worker_id());
        Ok(Self {
            is_repl,
            settings,
            engine: SingleNodeEngine::new(),
            graph,
            labels: HashMap::new(),
            edge_types: HashMap::new(),
            properties: HashMap::new(),
            commands_run: 0,
        })
    }

    async fn prompt(&self) -> String {
        match self.settings.prompt.as_ref() {
            Some(prompt) => format!("{} ", prompt.trim_end()),
            None => format!("{} > ", DEFAULT_PROMPT),
        }
    }

    pub async fn handle_repl(&mut self) {
        let config = Builder::new()
            .completion_prompt_limit(5)
            .completion_type(CompletionType::Circular)
            .build();
        let mut rl = Editor::<(), DefaultHistory>::with_config(config).unwrap();
        rl.load_history(&get_history_path()).ok();

        loop {
            match rl.readline(&self.prompt().await) {
                Ok(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let _ = rl.add_history_entry(&line);
                    match self.handle_query(&line).await {
                        Ok(None) => break,
                        Ok(Some(output)) => {
                            if !output.is_empty() {
                                println!("{}", output);
                            }
                        }
                        Err(e) => {
                            eprintln!("{} {}", "error:".red(), e);
                        }
                    }
                }
                Err(e) => match e {
                    ReadlineError::Io(err) => {
                        eprintln!("io err: {err}");
                    }
                    ReadlineError::Interrupted => {
                        println!("^C");
                    }
                    ReadlineError::Eof => {
                        break;
                    }
                    _ => {}
                },
            }
        }

        println!("Bye~");
        let _ = rl.save_history(&get_history_path());
    }

    /// Feeds every line of `r` through the session, for piped input.
    pub async fn handle_reader<R: BufRead>(&mut self, r: R) -> Result<()> {
        let start = Instant::now();
        let mut executed = 0u64;

        for line in r.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match self.handle_query(&line).await? {
                None => break,
                Some(output) => {
                    if !output.is_empty() {
                        println!("{}", output);
                    }
                    executed += 1;
                }
            }
        }

        if self.settings.show_stats.unwrap_or(false) {
            eprintln!("{} commands in {:?}", executed, start.elapsed());
        }
        Ok(())
    }

    /// Executes one command line. `Ok(None)` means the session should end.
    pub async fn handle_query(&mut self, query: &str) -> Result<Option<String>> {
        self.commands_run += 1;
        let result = self.execute(query);

        let every = self.settings.gc_every();
        if every > 0 && self.commands_run % every == 0 {
            let freed = self.gc()?;
            debug!("Automatic gc freed {} versions", freed);
        }
        result
    }

    fn execute(&mut self, line: &str) -> Result<Option<String>> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let (keyword, args) = match words.split_first() {
            Some((keyword, args)) => (keyword.to_uppercase(), args),
            None => return Ok(Some(String::new())),
        };
        debug!("Executing {} with {} args", keyword, args.len());

        match (keyword.as_str(), args) {
            ("VERTEX", []) => {
                let gid = self.transact(|graph, tx| Ok(graph.insert_vertex(tx).gid()))?;
                Ok(Some(format!("vertex {}", gid)))
            }
            ("EDGE", [from, to, edge_type]) => {
                let from: Gid = parse_gid(from)?;
                let to: Gid = parse_gid(to)?;
                let type_name = edge_type.to_string();
                let edge_type = self.intern_edge_type(edge_type);
                let gid = self.transact(|graph, tx| {
                    let mut from = graph.vertex(from, tx).context("no such from vertex")?;
                    let mut to = graph.vertex(to, tx).context("no such to vertex")?;
                    Ok(graph.insert_edge(tx, &mut from, &mut to, edge_type)?.gid())
                })?;
                Ok(Some(format!("edge {}: {} -[{}]-> {}", gid, from, type_name, to)))
            }
            ("LABEL", [gid, label]) => {
                let gid = parse_gid(gid)?;
                let label = self.intern_label(label);
                self.transact(|graph, tx| {
                    let mut vertex = graph.vertex(gid, tx).context("no such vertex")?;
                    vertex.add_label(label)?;
                    Ok(())
                })?;
                Ok(Some("OK ~".to_string()))
            }
            ("UNLABEL", [gid, label]) => {
                let gid = parse_gid(gid)?;
                let label = self.intern_label(label);
                self.transact(|graph, tx| {
                    let mut vertex = graph.vertex(gid, tx).context("no such vertex")?;
                    vertex.remove_label(label)?;
                    Ok(())
                })?;
                Ok(Some("OK ~".to_string()))
            }
            ("HAS", [gid, label]) => {
                let gid = parse_gid(gid)?;
                let label = self.intern_label(label);
                let has = self.transact(|graph, tx| {
                    Ok(graph.vertex(gid, tx).map_or(false, |vertex| vertex.has_label(label)))
                })?;
                Ok(Some(has.to_string()))
            }
            ("SET", [gid, key, value]) => {
                let gid = parse_gid(gid)?;
                let key = self.intern_property(key);
                let value = parse_value(value);
                self.transact(|graph, tx| {
                    let mut vertex = graph.vertex(gid, tx).context("no such vertex")?;
                    vertex.set_property(key, value)?;
                    Ok(())
                })?;
                Ok(Some("OK ~".to_string()))
            }
            ("GET", [gid, key]) => {
                let gid = parse_gid(gid)?;
                let key = self.intern_property(key);
                let value = self.transact(|graph, tx| {
                    let vertex = graph.vertex(gid, tx).context("no such vertex")?;
                    Ok(vertex.property(key).cloned())
                })?;
                Ok(Some(match value {
                    Some(value) => value.to_string(),
                    None => "N/A ~".to_string(),
                }))
            }
            ("DEGREE", [gid]) => {
                let gid = parse_gid(gid)?;
                let degree = self.transact(|graph, tx| {
                    Ok(graph.vertex(gid, tx).context("no such vertex")?.degree())
                })?;
                Ok(Some(degree.to_string()))
            }
            ("REMOVE", [gid]) => {
                let gid = parse_gid(gid)?;
                self.transact(|graph, tx| {
                    graph.vertex(gid, tx).context("no such vertex")?.remove()?;
                    Ok(())
                })?;
                Ok(Some("OK ~".to_string()))
            }
            ("LIST", rest @ ([] | [_])) => {
                let label = match rest.first() {
                    Some(name) => Some(self.intern_label(name)),
                    None => None,
                };
                let gids = self.transact(|graph, tx| {
                    let vertices = graph.vertices(tx).fill();
                    Ok(match label {
                        Some(label) => {
                            vertices.label(label).map(|v| v.gid().to_string()).collect::<Vec<_>>()
                        }
                        None => vertices.map(|v| v.gid().to_string()).collect::<Vec<_>>(),
                    })
                })?;
                Ok(Some(if gids.is_empty() { "N/A ~".to_string() } else { gids.join("\n") }))
            }
            ("STATS", []) => {
                let status = self.graph.status();
                let last = self.engine.global_last()?;
                Ok(Some(format!(
                    "vertices: {}, edges: {}, last tx: {}",
                    status.vertices, status.edges, last,
                )))
            }
            ("GC", []) => {
                let freed = self.gc()?;
                Ok(Some(format!("freed {} versions", freed)))
            }
            ("HELP", _) => Ok(Some(HELP.to_string())),
            ("EXIT" | "QUIT", _) => Ok(None),
            _ => Err(anyhow!("unknown command, try HELP")),
        }
    }

    /// Runs `f` in a fresh transaction, committing on success and aborting on
    /// any error.
    fn transact<R>(&self, f: impl FnOnce(&Graph, &Transaction) -> Result<R>) -> Result<R> {
        let tx = self.engine.begin()?;
        match f(&self.graph, &tx) {
            Ok(result) => {
                self.engine.commit(tx.id)?;
                Ok(result)
            }
            Err(err) => {
                if self.engine.abort(tx.id).is_err() {
                    log::warn!(target: "session_warnings", "could not abort transaction {}", tx.id);
                }
                Err(err)
            }
        }
    }

    fn gc(&mut self) -> Result<u64> {
        let horizon = self.engine.gc_horizon()?;
        let clog = self.engine.commit_log().clone();
        let freed = self.graph.collect_garbage(horizon, &clog);
        info!("Session gc freed {} versions", freed);
        Ok(freed as u64)
    }

    fn intern_label(&mut self, name: &str) -> LabelId {
        let next = LabelId(self.labels.len() as u32);
        *self.labels.entry(name.to_string()).or_insert(next)
    }

    fn intern_edge_type(&mut self, name: &str) -> EdgeTypeId {
        let next = EdgeTypeId(self.edge_types.len() as u32);
        *self.edge_types.entry(name.to_string()).or_insert(next)
    }

    fn intern_property(&mut self, name: &str) -> PropertyId {
        let next = PropertyId(self.properties.len() as u32);
        *self.properties.entry(name.to_string()).or_insert(next)
    }

    pub fn is_repl(&self) -> bool {
        self.is_repl
    }
}

fn parse_gid(word: &str) -> Result<Gid> {
    word.parse::<Gid>().with_context(|| format!("not a gid: {}", word))
}

/// Typed literal parsing: integers, floats and booleans before strings.
fn parse_value(word: &str) -> Value {
    if let Ok(i) = word.parse::<i64>() {
        return Value::Int(i);
    }
    if let Ok(x) = word.parse::<f64>() {
        return Value::Float(x);
    }
    match word {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" => Value::Null,
        _ => Value::String(word.to_string()),
    }
}

fn get_history_path() -> String {
    format!(
        "{}/.graphcli_history",
        std::env::var("HOME").unwrap_or_else(|_| ".".to_string())
    )
}
