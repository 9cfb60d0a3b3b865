use ovncni::commands::run_cni;
use tracing::error;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn main() {
    // stdout is reserved for the CNI result
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);

    if let Err(failure) = run_cni() {
        error!("CNI plugin error: {:#}", failure.error);

        if let Err(print_err) = failure.reply().print() {
            error!("Failed to print CNI error: {}", print_err);
        }
        std::process::exit(1);
    }
}
