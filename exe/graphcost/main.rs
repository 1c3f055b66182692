mod app_config;

use std::collections::BTreeMap;
use std::{error::Error, fs, path::Path, path::PathBuf};

use clap::{Parser, Subcommand};
use tracing::info;

use app_config::AppConfig;
use lib::frameworks::{import_flat, FlatOp};
use lib::{utils, Graph};

#[derive(Parser)]
struct Cli {
  /// YAML config file
  #[arg(long, value_name = "PATH")]
  config: Option<PathBuf>,
  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Total algorithmic flops of a serialized graph
  Flops {
    /// JSON file with the flattened op list
    graph: PathBuf,
  },
  /// Resolved shape of every tensor in a serialized graph
  Shapes {
    graph: PathBuf,
  },
  /// Graphviz dot dump of a serialized graph
  Dot {
    graph: PathBuf,
    /// Output path for the dot file
    #[arg(long, value_name = "PATH")]
    out: PathBuf,
  },
}

fn read_config(path: Option<&Path>) -> Result<AppConfig, Box<dyn Error>> {
  let config = AppConfig::default();
  match path {
    None => Ok(config),
    Some(path) => {
      let text = fs::read_to_string(path)?;
      let from_file: AppConfig = serde_yaml::from_str(&text)?;
      Ok(config.merge(from_file))
    }
  }
}

fn load_graph(path: &Path) -> Result<Graph, Box<dyn Error>> {
  let text = fs::read_to_string(path)?;
  let ops: Vec<FlatOp> = serde_json::from_str(&text)?;
  let mut graph = import_flat(ops)?;
  graph.propagate_shapes()?;
  Ok(graph)
}

fn shape_table(graph: &Graph) -> BTreeMap<String, String> {
  graph
    .tensors()
    .iter()
    .map(|(name, tensor)| (name.clone(), tensor.shape.to_string()))
    .collect()
}

fn main() -> Result<(), Box<dyn Error>> {
  utils::init_logging()?;
  let args = Cli::parse();
  let config = read_config(args.config.as_deref())?;

  match args.command {
    Command::Flops { graph } => {
      let g = load_graph(&graph)?;
      if config.artifacts == Some(true) {
        let path = graph.with_extension("shapes.json");
        utils::serialize_to_file(&path, &shape_table(&g))?;
        info!(path = %path.display(), "saved shape artifact");
      }
      println!("{}", g.calc_alg_flops()?);
    }
    Command::Shapes { graph } => {
      let g = load_graph(&graph)?;
      for (name, shape) in shape_table(&g) {
        println!("{}\t{}", name, shape);
      }
    }
    Command::Dot { graph, out } => {
      let g = load_graph(&graph)?;
      g.save_graphviz(&out)?;
      info!(path = %out.display(), "saved dot file");
    }
  }
  Ok(())
}
