use std::sync::Arc;
use std::time::Duration;

use russh::ChannelMsg;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use crate::ssh::HandleController;

use super::types::Tunnel;

const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Opens a direct-tcpip channel to `127.0.0.1:<remotePort>` over the
/// instance's session and splices it bidirectionally with `local_stream`
/// until either side closes, the session disconnects, or the idle timeout
/// elapses. Three concurrent, single-owner tasks (local reader, local
/// writer, SSH I/O) coordinate over mpsc channels instead of sharing a
/// mutex over the socket or the SSH channel.
pub async fn splice_connection(
    controller: HandleController,
    mut local_stream: TcpStream,
    tunnel: Arc<Tunnel>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), russh::Error> {
    let mut channel = controller
        .open_direct_tcpip("127.0.0.1", tunnel.remote_port as u32, "127.0.0.1", 0)
        .await?;

    let (mut local_read, mut local_write) = local_stream.split();

    let (local_to_ssh_tx, mut local_to_ssh_rx) = mpsc::channel::<Vec<u8>>(32);
    let (ssh_to_local_tx, mut ssh_to_local_rx) = mpsc::channel::<Vec<u8>>(32);

    let (close_tx, _) = broadcast::channel::<()>(1);
    let mut close_rx1 = close_tx.subscribe();
    let mut close_rx2 = close_tx.subscribe();

    let tunnel_for_send = tunnel.clone();
    let tunnel_for_recv = tunnel.clone();

    let local_reader = async move {
        let mut buf = vec![0u8; 32 * 1024];
        loop {
            tokio::select! {
                biased;
                _ = close_rx1.recv() => break,
                result = tokio::time::timeout(IDLE_TIMEOUT, local_read.read(&mut buf)) => {
                    match result {
                        Ok(Ok(0)) => break,
                        Ok(Ok(n)) => {
                            tunnel_for_send.add_bytes(n as u64);
                            if local_to_ssh_tx.send(buf[..n].to_vec()).await.is_err() {
                                break;
                            }
                        }
                        Ok(Err(_)) | Err(_) => break,
                    }
                }
            }
        }
    };

    let local_writer = async move {
        loop {
            tokio::select! {
                biased;
                _ = close_rx2.recv() => break,
                data = ssh_to_local_rx.recv() => {
                    match data {
                        Some(data) => {
                            if local_write.write_all(&data).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
    };

    let ssh_io = async move {
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                data = local_to_ssh_rx.recv() => {
                    match data {
                        Some(data) => {
                            if channel.data(&data[..]).await.is_err() {
                                break;
                            }
                        }
                        None => {
                            let _ = channel.eof().await;
                            break;
                        }
                    }
                }
                result = tokio::time::timeout(IDLE_TIMEOUT, channel.wait()) => {
                    match result {
                        Ok(Some(ChannelMsg::Data { data })) => {
                            tunnel_for_recv.add_bytes(data.len() as u64);
                            if ssh_to_local_tx.send(data.to_vec()).await.is_err() {
                                break;
                            }
                        }
                        Ok(Some(ChannelMsg::Eof)) | Ok(Some(ChannelMsg::Close)) | Ok(None) => break,
                        Ok(_) => continue,
                        Err(_) => {
                            debug!(instance = %tunnel_for_recv.instance_name, "tunnel connection idle timeout");
                            break;
                        }
                    }
                }
            }
        }
        let _ = channel.close().await;
    };

    tokio::select! {
        _ = local_reader => {}
        _ = local_writer => {}
        _ = ssh_io => {}
    }
    let _ = close_tx.send(());

    Ok(())
}
