//! Wired accessory link: a character device node exposed by the
//! host-side accessory driver. Opening it for writing is the whole
//! handshake; the kernel driver handles framing down the cable.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs::OpenOptions;
use tracing::info;

use crate::error::StreamError;

use super::{LinkSink, Transport, TransportKind};

pub struct AccessoryTransport {
    path: PathBuf,
}

impl AccessoryTransport {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl Transport for AccessoryTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Accessory
    }

    async fn open(&self) -> Result<LinkSink, StreamError> {
        let file = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .await
            .map_err(|err| {
                StreamError::Acquisition(format!(
                    "accessory endpoint {}: {err}",
                    self.path.display()
                ))
            })?;
        info!(path = %self.path.display(), "accessory endpoint opened");
        Ok(Box::new(file))
    }
}
