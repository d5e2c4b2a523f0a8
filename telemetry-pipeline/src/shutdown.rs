use tokio_util::sync::CancellationToken;

/// Token cancelled on Ctrl-C, or SIGTERM on unix.
pub fn signal_token() -> CancellationToken {
    let token = CancellationToken::new();

    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("received shutdown signal");
                ctrl_c_token.cancel();
            }
            Err(e) => tracing::error!(error = %e, "error setting up signal handler"),
        }
    });

    #[cfg(unix)]
    {
        let sigterm_token = token.clone();
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                    tracing::info!("received SIGTERM");
                    sigterm_token.cancel();
                }
                Err(e) => tracing::error!(error = %e, "error setting up SIGTERM handler"),
            }
        });
    }

    token
}
