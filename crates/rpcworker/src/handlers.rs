use rpcworker::runtime::{HandlerError, HandlerRegistry, Request, Stream};
use tracing::debug;

/// Handlers served by the reference binary.
pub fn registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.on("echo", echo).on("ping", ping);
    registry
}

/// Streams every inbound chunk back and chokes once the request closes.
fn echo(mut request: Request, mut stream: Stream) -> Result<(), HandlerError> {
    tokio::task::spawn_local(async move {
        loop {
            match request.read().await {
                Ok(Some(data)) => {
                    if let Err(err) = stream.write(data) {
                        debug!(session = stream.session(), error = %err, "echo stopped");
                        return;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    debug!(session = request.session(), code = err.code, "echo request failed");
                    break;
                }
            }
        }
        let _ = stream.close();
    });
    Ok(())
}

fn ping(_request: Request, mut stream: Stream) -> Result<(), HandlerError> {
    stream.write("pong")?;
    stream.close()?;
    Ok(())
}
