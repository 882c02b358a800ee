mod cli;

use tfslice::graph::{seed_blocks, BlockId, BlockType, Graph};
use tfslice::manifest::ModuleManifest;
use tfslice::module::{ModuleId, ModuleTree};

fn main() {
    use clap::Parser;
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_env("TFSLICE_LOG"))
        .with_writer(std::io::stderr)
        .init();

    for new_path in cli.directory.iter() {
        match new_path.canonicalize() {
            Err(e) => {
                eprintln!(
                    "Failed to resolve path for -C/--directory {}\n{}",
                    new_path.display(),
                    e
                );
                std::process::exit(1);
            }
            Ok(cwd) => {
                if let Err(err) = std::env::set_current_dir(&cwd) {
                    eprintln!("Failed to set work directory to {}\n{}", cwd.display(), err,);
                    std::process::exit(1);
                }

                tracing::info!(directory=%cwd.display(), "Changed working directory");
            }
        }
    }

    let command_result = match cli.command {
        cli::Command::Inspect(inspect_cli) => inspect(inspect_cli),
        cli::Command::Graph(graph_cli) => graph(graph_cli),
        cli::Command::Extract(extract_cli) => extract(extract_cli),
    };

    if let Err(e) = command_result {
        for error in e.chain() {
            eprintln!("{error}")
        }
        std::process::exit(1);
    }
}

pub fn inspect(cli: cli::InspectCommand) -> anyhow::Result<()> {
    let tree = load(&cli.input)?;
    output(&cli.output, &tree)
}

pub fn graph(cli: cli::GraphCommand) -> anyhow::Result<()> {
    let tree = load(&cli.input)?;
    let graph = build_graph(&tree, &cli.select);

    match cli.output.format {
        cli::OutputFormat::Text => print!("{graph}"),
        _ => output(&cli.output, &graph)?,
    }
    Ok(())
}

pub fn extract(cli: cli::ExtractCommand) -> anyhow::Result<()> {
    let tree = load(&cli.input)?;
    let seeds = seeds(&tree, &cli.select);
    let graph = Graph::build(&tree, ModuleId::ROOT, seeds.clone());

    let mut extractor = tfslice::extract::Extractor::new(&tree, ModuleId::ROOT, &cli.out)?;
    extractor.extract_closure(&graph, &seeds)?;

    for file in extractor.files() {
        println!("{}", file.display());
    }
    Ok(())
}

fn load(input: &cli::InputArgs) -> anyhow::Result<ModuleTree> {
    let manifest = match &input.manifest {
        Some(path) => Some(ModuleManifest::load(path)?),
        None => ModuleManifest::discover(&input.module)?,
    };

    let tree = ModuleTree::load(&input.module, manifest.as_ref())?;

    for diagnostic in tree.diagnostics() {
        eprintln!("{diagnostic}");
    }
    anyhow::ensure!(
        input.ignore_errors || !tree.has_errors(),
        "Configuration has errors (use --ignore-errors to continue anyway)"
    );

    Ok(tree)
}

fn seeds(tree: &ModuleTree, select: &cli::SelectArgs) -> Vec<BlockId> {
    let mut seeds = seed_blocks(tree.root(), |name| name.starts_with(&select.select));
    if select.no_outputs {
        seeds.retain(|id| id.block_type != BlockType::Output);
    }
    if seeds.is_empty() {
        tracing::warn!(prefix = select.select, "selection is empty");
    }
    seeds
}

fn build_graph(tree: &ModuleTree, select: &cli::SelectArgs) -> Graph {
    Graph::build(tree, ModuleId::ROOT, seeds(tree, select))
}

fn output(output: &cli::OutputArgs, value: &impl serde::Serialize) -> anyhow::Result<()> {
    match output.format {
        cli::OutputFormat::Yaml => serde_yaml::to_writer(std::io::stdout(), value)?,
        cli::OutputFormat::Json | cli::OutputFormat::Text => {
            serde_json::to_writer_pretty(std::io::stdout(), value)?
        }
    };

    Ok(())
}
