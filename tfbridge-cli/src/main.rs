mod commands;
mod logging;

use std::path::PathBuf;
use std::process::exit;

use anyhow::Result;
use clap::{CommandFactory as _, Parser, Subcommand};

fn main() {
    let args = Args::parse();
    handle_result(run_args(args));
}

fn run_args(args: Args) -> Result<()> {
    let mut logger = logging::set_up(logging::Options {
        verbose: args.options.verbose,
        color: args.options.color,
    })?;
    let r = run_command(&args);
    logger.tear_down()?;
    r
}

fn run_command(args: &Args) -> Result<()> {
    match &args.command {
        Commands::Schema { schema } => {
            let schema = commands::load_schema(schema)?;
            print_json(&commands::schema_summary(&schema))
        }
        Commands::Propose(input) => {
            let input = input.load()?;
            print_json(&commands::propose(&input)?)
        }
        Commands::Diff {
            input,
            ignore_changes,
            options,
        } => {
            let input = input.load()?;
            let options = match options {
                Some(path) => commands::load_options(path)?,
                None => Default::default(),
            };
            print_json(&commands::plan_diff(&input, &options, ignore_changes)?)
        }
        Commands::Flatten { input } => {
            let input = input.load()?;
            print_json(&commands::flatten(&input)?)
        }
        Commands::GenerateMan => {
            let cmd = Args::command();
            let man = clap_mangen::Man::new(cmd);
            let mut buffer: Vec<u8> = Default::default();
            man.render(&mut buffer)?;
            println!("{}", String::from_utf8(buffer)?);
            Ok(())
        }
        Commands::GenerateMarkdown => {
            let opts = clap_markdown::MarkdownOptions::new().show_footer(false);
            let markdown: String = clap_markdown::help_markdown_custom::<Args>(&opts);
            println!("{}", markdown);
            Ok(())
        }
        Commands::GenerateCompletion { shell } => {
            let mut cmd = Args::command();
            clap_complete::generate(*shell, &mut cmd, "tfbridge", &mut std::io::stdout());
            Ok(())
        }
    }
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn handle_result(r: Result<()>) {
    if let Err(e) = r {
        eprintln!("tfbridge error: {:#}", e);
        exit(1);
    }
}

/// Plan, diff and inspect provider resource values offline
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    options: Options,
}

#[derive(Parser, Debug, Clone)]
struct Options {
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    /// Use colors in log output
    #[arg(long, global = true, default_value = "false")]
    color: bool,
}

/// A resource of a provider schema, with its prior state and configuration.
#[derive(clap::Args, Debug)]
struct ResourceInput {
    /// Provider schema document (JSON)
    #[arg(long)]
    schema: PathBuf,

    /// Resource type name in the schema
    #[arg(long)]
    resource: String,

    /// Prior state as a JSON object; absent for a new resource
    #[arg(long)]
    prior: Option<PathBuf>,

    /// Configuration as a JSON object
    #[arg(long)]
    config: Option<PathBuf>,
}

impl ResourceInput {
    fn load(&self) -> Result<commands::Input> {
        commands::Input::load(
            &self.schema,
            &self.resource,
            self.prior.as_deref(),
            self.config.as_deref(),
        )
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the implied type and version of every resource in a schema
    Schema {
        /// Provider schema document (JSON)
        #[arg(long)]
        schema: PathBuf,
    },

    /// Print the proposed new state for a configuration
    Propose(ResourceInput),

    /// Print the changes between prior state and the proposed new state
    Diff {
        #[command(flatten)]
        input: ResourceInput,

        /// Attribute path whose changes are ignored (repeatable)
        #[arg(long = "ignore-changes")]
        ignore_changes: Vec<String>,

        /// Bridge options document (JSON)
        #[arg(long)]
        options: Option<PathBuf>,
    },

    /// Print the prior state in the legacy flat attribute encoding
    Flatten {
        #[command(flatten)]
        input: ResourceInput,
    },

    /// Generate markdown documentation for tfbridge
    #[command(hide = true)]
    GenerateMarkdown,

    /// Generate a manpage for tfbridge
    #[command(hide = true)]
    GenerateMan,

    /// Generate shell completion for tfbridge
    #[command(hide = true)]
    GenerateCompletion {
        /// The shell to generate completion for
        #[arg(long)]
        shell: clap_complete::Shell,
    },
}
