use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use anyhow::Result;

use codetrail::core::Engine;

#[derive(Parser)]
#[command(name = "codetrail")]
#[command(about = "Learn a codebase through explanations you can trace back to the code")]
#[command(version)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Repository root to analyze
    #[arg(short, long, default_value = ".")]
    pub repo: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args)]
pub struct GoalArgs {
    /// What you want to learn, in your own words
    pub goal: String,

    /// Restrict the goal to paths under this prefix (repeatable)
    #[arg(short, long)]
    pub scope: Vec<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Rank repository files against a learning goal
    Select {
        #[command(flatten)]
        goal: GoalArgs,
    },

    /// Analyze relationships, flows and patterns across the selected files
    Analyze {
        #[command(flatten)]
        goal: GoalArgs,

        /// Print the full analysis as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate learning artifacts and register their evidence
    Explain {
        #[command(flatten)]
        goal: GoalArgs,

        /// Output directory for rendered artifacts
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show the evidence behind an artifact
    Trace {
        artifact_id: String,
    },

    /// Mark every artifact built on a file as outdated
    Invalidate {
        file: String,
    },

    /// Find the artifacts that reference a file or line
    Lookup {
        file: String,

        /// 1-based line number
        #[arg(short, long)]
        line: Option<usize>,
    },

    /// Re-verify all evidence against the current source
    Check {
        /// Exit with an error if anything drifted (useful for CI)
        #[arg(long)]
        fail_on_drift: bool,
    },

    /// Withdraw an artifact without deleting its evidence
    Revoke {
        artifact_id: String,
    },
}

impl Cli {
    pub async fn execute(self, engine: Engine) -> Result<()> {
        match self.command {
            Commands::Select { goal } => {
                let (_, selection) = engine.select(&goal.goal, &goal.scope).await?;
                for file in &selection.selected {
                    println!(
                        "{:>3}. {:<48} {:.3}  {:?}",
                        file.priority, file.path, file.score.total, file.score.role
                    );
                }
                Ok(())
            }
            Commands::Analyze { goal, json } => {
                let (_, analysis) = engine.analyze(&goal.goal, &goal.scope).await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&analysis)?);
                    return Ok(());
                }
                for flow in &analysis.data_flows {
                    println!("{}  {}", flow.id, flow.description);
                }
                for path in &analysis.execution_paths {
                    println!("{}  {}", path.id, path.files().join(" -> "));
                }
                for pattern in &analysis.patterns {
                    println!("{}  {}: {}", pattern.id, pattern.kind, pattern.files.join(", "));
                }
                Ok(())
            }
            Commands::Explain { goal, output } => {
                for artifact in engine.explain(&goal.goal, &goal.scope, output).await? {
                    println!("{}  [{}] {}", artifact.artifact_id, artifact.kind, artifact.title);
                }
                Ok(())
            }
            Commands::Trace { artifact_id } => {
                println!("{}", serde_json::to_string_pretty(&engine.trace(&artifact_id))?);
                Ok(())
            }
            Commands::Invalidate { file } => {
                print_ids(&engine.invalidate(&file)?);
                Ok(())
            }
            Commands::Lookup { file, line } => {
                print_ids(&engine.lookup(&file, line));
                Ok(())
            }
            Commands::Check { fail_on_drift } => {
                let drifted = engine.check()?;
                print_ids(&drifted);
                if fail_on_drift && !drifted.is_empty() {
                    anyhow::bail!("{} artifacts no longer match the source", drifted.len());
                }
                Ok(())
            }
            Commands::Revoke { artifact_id } => {
                if !engine.revoke(&artifact_id)? {
                    anyhow::bail!("Unknown artifact: {}", artifact_id);
                }
                Ok(())
            }
        }
    }
}

fn print_ids(ids: &[String]) {
    for id in ids {
        println!("{}", id);
    }
}
