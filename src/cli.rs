use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "rollcall", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path
    #[arg(short, long = "config", value_name = "FILE", global = true)]
    pub config_path: Option<String>,

    /// Verbose logging for the rollcall crates
    #[arg(long, global = true)]
    pub dev: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the gateway, viewer endpoint and admin endpoint in one process
    Serve {
        /// Listen host for every endpoint
        #[arg(long)]
        host: Option<String>,

        /// Registrant gateway port
        #[arg(short, long)]
        port: Option<u16>,

        /// Viewer WebSocket port
        #[arg(long)]
        viewer_port: Option<u16>,

        /// Admin HTTP port
        #[arg(long)]
        admin_port: Option<u16>,
    },

    /// Run only the registrant gateway and POST snapshots to a display service
    Login {
        /// Gateway host
        #[arg(long)]
        host: Option<String>,

        /// Gateway port
        #[arg(short, long)]
        port: Option<u16>,

        /// Display service endpoint
        #[arg(long)]
        display_url: Option<String>,
    },

    /// Run only the viewer endpoint and its admin trigger
    Display {
        /// Listen host
        #[arg(long)]
        host: Option<String>,

        /// Viewer WebSocket port
        #[arg(long)]
        viewer_port: Option<u16>,

        /// Admin HTTP port
        #[arg(long)]
        admin_port: Option<u16>,
    },

    /// Print the users currently in the store
    Users,

    /// Generate sample configuration
    ConfigSample {
        /// Output path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serve_overrides() {
        let cli = Cli::try_parse_from([
            "rollcall", "-c", "/tmp/r.yaml", "serve", "--port", "6000", "--dev",
        ])
        .unwrap();
        assert_eq!(cli.config_path.as_deref(), Some("/tmp/r.yaml"));
        assert!(cli.dev);
        match cli.command {
            Commands::Serve { port, host, .. } => {
                assert_eq!(port, Some(6000));
                assert!(host.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_subcommand_is_required() {
        assert!(Cli::try_parse_from(["rollcall"]).is_err());
    }

    #[test]
    fn test_login_display_url() {
        let cli = Cli::try_parse_from([
            "rollcall",
            "login",
            "--display-url",
            "http://10.0.0.9:5002/display",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Login { display_url: Some(ref url), .. } if url.ends_with("/display")
        ));
    }
}
