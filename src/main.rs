use clap::{Parser, Subcommand};
use govdocs_rag::Result;
use govdocs_rag::commands::{
    add_admin_identity, allow_identity, ask, disallow_identity, load_corpus,
    remove_admin_identity, reset_identity, search, set_limiter_enabled, set_limits, show_limits,
    stats,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "govdocs-rag")]
#[command(about = "Grounded question answering over government documents with usage quotas")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a corpus file and report its contents
    Load {
        /// Path to the corpus JSON file (defaults to the configured path)
        path: Option<PathBuf>,
    },
    /// Ask a question grounded in the loaded corpus
    Ask {
        /// The question to answer
        question: String,
        /// Identity to account the request under (defaults to 127.0.0.1)
        #[arg(long)]
        identity: Option<String>,
    },
    /// Retrieval only: show the chunks most similar to a query
    Search {
        /// The query text
        question: String,
        /// Maximum number of results
        #[arg(long)]
        k: Option<usize>,
    },
    /// Show usage statistics
    Stats {
        /// Show one identity's counters instead of the aggregate
        #[arg(long)]
        identity: Option<String>,
    },
    /// Manage usage limits and privileged identities
    #[command(subcommand)]
    Limits(LimitsCommand),
}

#[derive(Subcommand)]
enum LimitsCommand {
    /// Show the effective limiter configuration
    Show,
    /// Update limits; 0 means unlimited
    Set {
        #[arg(long)]
        prompt_limit: Option<u64>,
        #[arg(long)]
        token_limit: Option<u64>,
        #[arg(long)]
        reset_hours: Option<i64>,
    },
    /// Turn usage limiting on
    Enable,
    /// Turn usage limiting off
    Disable,
    /// Zero one identity's counters and history
    Reset { identity: String },
    /// Add an identity (or CIDR block) to the unlimited list
    Allow { identity: String },
    /// Remove an identity from the unlimited list
    Disallow { identity: String },
    /// Grant an identity admin rights
    AdminAdd { identity: String },
    /// Revoke an identity's admin rights
    AdminRemove { identity: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Load { path } => {
            load_corpus(path)?;
        }
        Commands::Ask { question, identity } => {
            ask(question, identity).await?;
        }
        Commands::Search { question, k } => {
            search(question, k)?;
        }
        Commands::Stats { identity } => {
            stats(identity).await?;
        }
        Commands::Limits(command) => match command {
            LimitsCommand::Show => show_limits()?,
            LimitsCommand::Set {
                prompt_limit,
                token_limit,
                reset_hours,
            } => set_limits(prompt_limit, token_limit, reset_hours).await?,
            LimitsCommand::Enable => set_limiter_enabled(true).await?,
            LimitsCommand::Disable => set_limiter_enabled(false).await?,
            LimitsCommand::Reset { identity } => reset_identity(identity).await?,
            LimitsCommand::Allow { identity } => allow_identity(identity).await?,
            LimitsCommand::Disallow { identity } => disallow_identity(identity).await?,
            LimitsCommand::AdminAdd { identity } => add_admin_identity(identity).await?,
            LimitsCommand::AdminRemove { identity } => remove_admin_identity(identity).await?,
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn cli_parsing() {
        let cli = Cli::try_parse_from(["govdocs-rag", "stats"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            matches!(parsed.command, Commands::Stats { .. });
        }
    }

    #[test]
    fn ask_command_with_identity() {
        let cli = Cli::try_parse_from([
            "govdocs-rag",
            "ask",
            "what does EO 14067 cover?",
            "--identity",
            "203.0.113.5",
        ]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Ask { question, identity } = parsed.command {
                assert_eq!(question, "what does EO 14067 cover?");
                assert_eq!(identity, Some("203.0.113.5".to_string()));
            }
        }
    }

    #[test]
    fn load_command_with_path() {
        let cli = Cli::try_parse_from(["govdocs-rag", "load", "/data/corpus.json"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Load { path } = parsed.command {
                assert_eq!(path, Some(PathBuf::from("/data/corpus.json")));
            }
        }
    }

    #[test]
    fn limits_set_flags() {
        let cli = Cli::try_parse_from([
            "govdocs-rag",
            "limits",
            "set",
            "--prompt-limit",
            "50",
            "--reset-hours",
            "12",
        ]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Limits(LimitsCommand::Set {
                prompt_limit,
                token_limit,
                reset_hours,
            }) = parsed.command
            {
                assert_eq!(prompt_limit, Some(50));
                assert_eq!(token_limit, None);
                assert_eq!(reset_hours, Some(12));
            }
        }
    }

    #[test]
    fn limits_allow_takes_cidr() {
        let cli = Cli::try_parse_from(["govdocs-rag", "limits", "allow", "10.0.0.0/8"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Limits(LimitsCommand::Allow { identity }) = parsed.command {
                assert_eq!(identity, "10.0.0.0/8");
            }
        }
    }

    #[test]
    fn invalid_command() {
        let cli = Cli::try_parse_from(["govdocs-rag", "invalid"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
        }
    }

    #[test]
    fn help_message() {
        let cli = Cli::try_parse_from(["govdocs-rag", "--help"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        }
    }
}
