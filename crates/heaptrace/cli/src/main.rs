// Heaptrace
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Heaptrace CLI
//!
//! Offline queries over an event log written by a trace session.

use clap::{Parser, Subcommand};
use heaptrace_core::persistence::load_log;
use heaptrace_core::graph::{self, missing_count};
use heaptrace_core::{CausalityQuery, ClassId, Completeness, FieldHolder, FieldId, LogFormat, NodeId, ObjectId, TraceEvent};
use std::path::{Path, PathBuf};
use std::process;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "heaptrace")]
#[command(about = "Heaptrace - heap reachability causality queries")]
#[command(version = "0.1.0")]
struct Cli {
    /// Event log written by a trace session
    #[arg(long, short = 'l', global = true, default_value = "heaptrace.jsonl")]
    log: PathBuf,

    /// Log encoding (json or binary); defaults to the file extension
    #[arg(long, global = true)]
    format: Option<LogFormat>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Explain why a node is reachable
    Explain {
        /// Node as kind:id, e.g. object:42
        node: NodeId,
        /// Fail when the chain may be incomplete
        #[arg(long)]
        strict: bool,
    },
    /// List every write into one array slot
    Writers {
        /// Container object id
        container: u64,
        /// Slot index
        index: u32,
    },
    /// List every write into one field
    FieldWriters {
        /// Holder as kind:id; class for a static field, object for an instance field
        holder: NodeId,
        /// Field id
        field: u64,
    },
    /// Find the class initializer responsible for an object
    Responsible {
        /// Object id
        object: u64,
        /// Restrict to the latest write of the object into container[index]
        #[arg(long, num_args = 2, value_names = ["CONTAINER", "INDEX"], conflicts_with_all = ["static_field", "instance_field"])]
        slot: Option<Vec<u64>>,
        /// Restrict to the latest store of the object into a static field
        #[arg(long, num_args = 2, value_names = ["CLASS", "FIELD"], conflicts_with = "instance_field")]
        static_field: Option<Vec<u64>>,
        /// Restrict to the latest store of the object into an instance field
        #[arg(long, num_args = 2, value_names = ["OBJECT", "FIELD"])]
        instance_field: Option<Vec<u64>>,
    },
    /// Find the initializer that triggered a class's initialization
    TriggeredBy {
        /// Class id
        class: u64,
    },
    /// Show graph statistics
    Stats,
    /// Render the graph in Graphviz DOT format
    Dot,
}

fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let query = match load_query(&cli.log, cli.format) {
        Ok(query) => query,
        Err(e) => {
            error!("Failed to load event log {}: {}", cli.log.display(), e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Explain { node, strict } => handle_explain(&query, node, strict, cli.json),
        Commands::Writers { container, index } => handle_writers(&query, container, index, cli.json),
        Commands::FieldWriters { holder, field } => handle_field_writers(&query, holder, field, cli.json),
        Commands::Responsible {
            object,
            slot,
            static_field,
            instance_field,
        } => match (static_field, instance_field) {
            (Some(field), _) => handle_responsible_for_field(&query, object, &field, true),
            (_, Some(field)) => handle_responsible_for_field(&query, object, &field, false),
            (None, None) => handle_responsible(&query, object, slot.as_deref()),
        },
        Commands::TriggeredBy { class } => handle_triggered_by(&query, class),
        Commands::Stats => handle_stats(&query, cli.json),
        Commands::Dot => {
            print!("{}", query.to_dot());
            Ok(())
        }
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_query(path: &Path, format: Option<LogFormat>) -> anyhow::Result<CausalityQuery> {
    let format = format.unwrap_or_else(|| LogFormat::from_path(path));
    let events = load_log(path, format)?;
    info!("Replaying {} events from {}", events.len(), path.display());
    Ok(CausalityQuery::from_graph(graph::replay(events)))
}

fn handle_explain(query: &CausalityQuery, node: NodeId, strict: bool, json: bool) -> anyhow::Result<()> {
    let explanation = query.explain(node)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&explanation)?);
    } else if explanation.is_root() {
        println!("{node} is a root");
    } else {
        for (step, edge) in explanation.chain.iter().enumerate() {
            println!("{:>3}. {}", step + 1, edge);
        }
        if explanation.chain.is_empty() {
            println!("{node} is not reachable from any recorded root");
        }
        if let Completeness::PossiblyIncomplete { gaps } = &explanation.completeness {
            println!("warning: possibly incomplete, {} missing events at or before this chain", missing_count(gaps));
        }
    }

    if strict {
        explanation.into_result()?;
    }
    Ok(())
}

fn handle_writers(query: &CausalityQuery, container: u64, index: u32, json: bool) -> anyhow::Result<()> {
    let writers = query.all_writers(ObjectId(container), index);

    if json {
        println!("{}", serde_json::to_string_pretty(&writers)?);
        return Ok(());
    }
    if writers.is_empty() {
        println!("No writes recorded into object:{container}[{index}]");
    }
    for event in &writers {
        if let TraceEvent::ArrayWrite {
            value_id,
            thread_id,
            sequence_no,
            ..
        } = event
        {
            println!("{} object:{} by thread:{}", sequence_no, value_id.0, thread_id.0);
        }
    }
    Ok(())
}

fn handle_field_writers(query: &CausalityQuery, holder: NodeId, field: u64, json: bool) -> anyhow::Result<()> {
    let holder = match holder {
        NodeId::Object(id) => FieldHolder::Object(id),
        NodeId::Class(id) => FieldHolder::Class(id),
        NodeId::Thread(_) => anyhow::bail!("a field holder is an object or a class, got {holder}"),
    };
    let writers = query.all_field_writers(holder, FieldId(field));

    if json {
        println!("{}", serde_json::to_string_pretty(&writers)?);
        return Ok(());
    }
    if writers.is_empty() {
        println!("No writes recorded into {holder}.field:{field}");
    }
    for event in &writers {
        if let TraceEvent::FieldWrite {
            value_id,
            thread_id,
            sequence_no,
            ..
        } = event
        {
            println!("{} object:{} by thread:{}", sequence_no, value_id.0, thread_id.0);
        }
    }
    Ok(())
}

fn handle_responsible_for_field(query: &CausalityQuery, object: u64, field: &[u64], is_static: bool) -> anyhow::Result<()> {
    let [holder, field] = field else {
        anyhow::bail!("field options expect HOLDER FIELD, got {} values", field.len());
    };
    let class = if is_static {
        query.class_responsible_for_static_field_write(ClassId(*holder), FieldId(*field), ObjectId(object))
    } else {
        query.class_responsible_for_nonstatic_field_write(ObjectId(*holder), FieldId(*field), ObjectId(object))
    };
    print_class(class);
    Ok(())
}

fn handle_responsible(query: &CausalityQuery, object: u64, slot: Option<&[u64]>) -> anyhow::Result<()> {
    let class = match slot {
        Some([container, index]) => {
            let index = u32::try_from(*index)?;
            query.class_responsible_for_array_write(ObjectId(*container), index, ObjectId(object))
        }
        Some(other) => anyhow::bail!("--slot expects CONTAINER INDEX, got {} values", other.len()),
        None => query.responsible_class(ObjectId(object)),
    };
    print_class(class);
    Ok(())
}

fn handle_triggered_by(query: &CausalityQuery, class: u64) -> anyhow::Result<()> {
    print_class(query.class_responsible_for_class_init(ClassId(class)));
    Ok(())
}

fn print_class(class: Option<ClassId>) {
    match class {
        Some(class) => println!("class:{}", class.0),
        None => println!("No class initializer responsible"),
    }
}

fn handle_stats(query: &CausalityQuery, json: bool) -> anyhow::Result<()> {
    let stats = query.stats();
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("Nodes:    {} ({} objects, {} classes, {} threads)", stats.nodes(), stats.objects, stats.classes, stats.threads);
    println!("Edges:    {}", stats.edges);
    println!("Events:   {}", stats.events_applied);
    println!("Gaps:     {} missing events in {} ranges", stats.gaps, stats.gap_ranges);
    match stats.last_applied {
        Some(seq) => println!("Last:     {seq}"),
        None => println!("Last:     none"),
    }
    Ok(())
}
