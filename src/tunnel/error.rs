use thiserror::Error;

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("instance {0} has no active connection")]
    NotConnected(String),

    #[error("failed to bind local listener for {instance}/{service}: {source}")]
    ListenerBind {
        instance: String,
        service: String,
        #[source]
        source: std::io::Error,
    },
}
