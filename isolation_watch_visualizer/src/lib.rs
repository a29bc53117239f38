use std::sync::Arc;

use anyhow::Context;
use bytes::{Bytes, BytesMut};
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder};
use tokio::sync::broadcast;

#[cfg(feature = "web")]
mod web;
#[cfg(feature = "web")]
pub use web::{router, AppState, SetDistance, SetIsolationTime};

pub use isolation_watch::SessionControl;

/// Multipart boundary used by the `/video` stream.
pub const MJPEG_BOUNDARY: &str = "frame";

/// One annotated frame, already JPEG-encoded.
#[derive(Debug, Clone)]
pub struct FramePacket {
    pub ts_millis: u64,
    pub width: u32,
    pub height: u32,
    pub data: Arc<[u8]>,
}

impl FramePacket {
    /// Encodes a tightly packed RGB8 buffer.
    pub fn jpeg_from_rgb(ts_millis: u64, width: u32, height: u32, rgb: &[u8], quality: u8) -> anyhow::Result<Self> {
        let expected = width as usize * height as usize * 3;
        if rgb.len() != expected {
            anyhow::bail!("rgb buffer is {} bytes, expected {} for {}x{}", rgb.len(), expected, width, height);
        }

        let mut buf = Vec::with_capacity(expected / 8);
        JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
            .write_image(rgb, width, height, ExtendedColorType::Rgb8)
            .context("failed to encode frame as JPEG")?;

        Ok(Self { ts_millis, width, height, data: Arc::from(buf) })
    }

    /// The frame wrapped as one part of a `multipart/x-mixed-replace` stream.
    pub fn multipart_part(&self) -> Bytes {
        let mut part = BytesMut::with_capacity(self.data.len() + 64);
        part.extend_from_slice(b"--");
        part.extend_from_slice(MJPEG_BOUNDARY.as_bytes());
        part.extend_from_slice(b"\r\nContent-Type: image/jpeg\r\n\r\n");
        part.extend_from_slice(&self.data);
        part.extend_from_slice(b"\r\n");
        part.freeze()
    }
}

/// Fan-out of annotated frames from the frame loop to every connected viewer.
#[derive(Clone)]
pub struct FrameBus {
    pub frames_tx: broadcast::Sender<FramePacket>,
}

impl FrameBus {
    pub fn new(capacity: usize) -> Self {
        let (frames_tx, _) = broadcast::channel::<FramePacket>(capacity.max(1));
        Self { frames_tx }
    }

    /// Returns how many viewers received the frame; zero viewers is not an error.
    pub fn publish(&self, packet: FramePacket) -> usize {
        self.frames_tx.send(packet).unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
}

#[cfg(feature = "web")]
pub async fn start_server(bus: FrameBus, cfg: ServerConfig, control: SessionControl) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let app = router(AppState { control, bus });
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", cfg.bind_addr))?;
    tracing::info!("Dashboard listening on http://{}", cfg.bind_addr);

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "web server stopped");
        }
    });
    Ok(server)
}

#[cfg(not(feature = "web"))]
pub async fn start_server(_bus: FrameBus, _cfg: ServerConfig, _control: SessionControl) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    Err(anyhow::anyhow!("web feature not enabled for isolation_watch_visualizer"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_rgb_as_jpeg() {
        let rgb = vec![128u8; 16 * 8 * 3];
        let packet = FramePacket::jpeg_from_rgb(7, 16, 8, &rgb, 80).unwrap();
        assert_eq!(&packet.data[..2], &[0xFF, 0xD8]);
        assert_eq!((packet.width, packet.height, packet.ts_millis), (16, 8, 7));
    }

    #[test]
    fn rejects_mismatched_buffers() {
        assert!(FramePacket::jpeg_from_rgb(0, 16, 8, &[0u8; 10], 80).is_err());
    }

    #[test]
    fn multipart_part_is_framed() {
        let packet = FramePacket { ts_millis: 0, width: 1, height: 1, data: Arc::from(vec![1u8, 2, 3]) };
        let part = packet.multipart_part();
        assert_eq!(&part[..], b"--frame\r\nContent-Type: image/jpeg\r\n\r\n\x01\x02\x03\r\n");
    }

    #[test]
    fn publishing_without_viewers_is_fine() {
        let bus = FrameBus::new(2);
        let packet = FramePacket { ts_millis: 0, width: 1, height: 1, data: Arc::from(vec![0u8]) };
        assert_eq!(bus.publish(packet.clone()), 0);

        let mut rx = bus.frames_tx.subscribe();
        assert_eq!(bus.publish(packet), 1);
        assert!(rx.try_recv().is_ok());
    }
}
