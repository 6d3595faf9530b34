use clap::{Parser, Subcommand};

const HELP_EPILOG: &str = r#"Server options can also be provided via environment variables:
  CONFIG_PATH (default: ./config.yaml)
  DB_PATH     (default: data/app.db)
  PORT        (default: 5151 or config.listen_port)
  RUST_LOG    (default: info)

Use `hash-password` to produce a bcrypt hash for the `users` section of the config.
"#;

#[derive(Debug, Parser)]
#[command(
    name = "kidtimer-server",
    version,
    about = "Kid timer server",
    long_about = None,
    after_long_help = HELP_EPILOG,
)]
pub struct Cli {
    /// Optional subcommand. Without one, runs the server.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Prompt for a password and print its bcrypt hash
    HashPassword {
        /// bcrypt cost factor
        #[arg(long, default_value_t = bcrypt::DEFAULT_COST)]
        cost: u32,
    },
}

pub fn hash_password(cost: u32) -> Result<String, String> {
    let first = rpassword::prompt_password("Password: ").map_err(|e| e.to_string())?;
    if first.is_empty() {
        return Err("password must not be empty".into());
    }
    let second = rpassword::prompt_password("Repeat password: ").map_err(|e| e.to_string())?;
    if first != second {
        return Err("passwords do not match".into());
    }
    bcrypt::hash(first, cost).map_err(|e| e.to_string())
}
