#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use devctl::context_cmd::ContextArgs;
use devctl::down::DownArgs;
use devctl::exec::ExecArgs;
use devctl::kubeconfig_cmd::KubeconfigArgs;
use devctl::up::UpArgs;
use devctl::RuntimeFlags;

#[derive(Parser)]
#[clap(version, about = "Swap a running workload for a synced development container")]
struct Cli {
    /// The tracing filter used for logs.
    #[clap(long, env = "DEVCTL_LOG", default_value = "devctl=info,warn")]
    log_level: String,

    /// Skip TLS certificate verification against the cluster and control
    /// plane. Only ever use this against a cluster you trust.
    #[clap(long, global = true)]
    insecure_skip_tls_verify: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Activate dev mode for a manifest.
    Up(UpArgs),
    /// Tear down a previously activated dev mode shadow.
    Down(DownArgs),
    /// Run a command in the dev pod.
    Exec(ExecArgs),
    /// Write the current context's credentials to `$KUBECONFIG`.
    Kubeconfig(KubeconfigArgs),
    /// Switch (or bootstrap) the current control-plane context.
    Context(ContextArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let flags = RuntimeFlags::init(cli.insecure_skip_tls_verify);

    match &cli.command {
        Commands::Up(args) => devctl::up::run(args, &flags).await,
        Commands::Down(args) => devctl::down::run(args, &flags).await,
        Commands::Exec(args) => devctl::exec::run(args, &flags).await,
        Commands::Kubeconfig(args) => devctl::kubeconfig_cmd::run(args),
        Commands::Context(args) => devctl::context_cmd::run(args, &flags).await,
    }
}
