use anyhow::Result;
use isolation_watch::pipeline::{EngagementStatus, FrameAnalysis};
use isolation_watch::session::FrameObserver;
use isolation_watch_visualizer::{FrameBus, FramePacket};
use opencv::{
    core::{Mat, Point, Rect, Scalar},
    imgproc,
    prelude::*,
};
use std::time::Instant;
use tracing::warn;

use crate::camera::CameraFrame;

const FONT: i32 = imgproc::FONT_HERSHEY_SIMPLEX;

/// BGR colour per status: green, yellow, red.
fn status_color(status: EngagementStatus) -> Scalar {
    match status {
        EngagementStatus::Engaged => Scalar::new(0.0, 255.0, 0.0, 0.0),
        EngagementStatus::Watching => Scalar::new(0.0, 255.0, 255.0, 0.0),
        EngagementStatus::Isolated => Scalar::new(0.0, 0.0, 255.0, 0.0),
    }
}

/// Draws boxes, labels, tasks and the HUD onto a BGR frame in place.
pub fn draw_overlay(frame: &mut Mat, analysis: &FrameAnalysis) -> opencv::Result<()> {
    for person in &analysis.persons {
        let d = &person.detection;
        let color = status_color(person.status);
        let rect = Rect::new(d.x1, d.y1, d.x2 - d.x1, d.y2 - d.y1);
        imgproc::rectangle(frame, rect, color, 2, imgproc::LINE_8, 0)?;
        imgproc::put_text(frame, &person.label, Point::new(d.x1, d.y1 - 10), FONT, 0.6, color, 2, imgproc::LINE_8, false)?;

        for (i, task) in person.tasks.iter().enumerate() {
            let y = d.y2 + 20 * (i as i32 + 1);
            imgproc::put_text(frame, &format!("- {task}"), Point::new(d.x1, y), FONT, 0.5, color, 1, imgproc::LINE_8, false)?;
        }
    }

    let white = Scalar::new(255.0, 255.0, 255.0, 0.0);
    let hud = [
        format!("Distance: {}", analysis.settings.distance_threshold),
        format!("People: {}", analysis.live_state.total),
        format!("Isolated: {}", analysis.live_state.isolated),
    ];
    for (i, line) in hud.iter().enumerate() {
        let origin = Point::new(20, 40 + 30 * i as i32);
        imgproc::put_text(frame, line, origin, FONT, 0.8, white, 2, imgproc::LINE_8, false)?;
    }
    Ok(())
}

/// Renders each analysed frame and publishes it as JPEG on the frame bus.
pub struct OverlayRenderer {
    bus: FrameBus,
    jpeg_quality: u8,
    started: Instant,
}

impl OverlayRenderer {
    pub fn new(bus: FrameBus, jpeg_quality: u8) -> Self {
        Self { bus, jpeg_quality, started: Instant::now() }
    }

    fn render_and_publish(&mut self, mut frame: Mat, analysis: &FrameAnalysis) -> Result<()> {
        draw_overlay(&mut frame, analysis)?;

        let mut rgb = Mat::default();
        imgproc::cvt_color(&frame, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;
        if !rgb.is_continuous() {
            rgb = rgb.try_clone()?;
        }
        let size = rgb.size()?;
        let packet = FramePacket::jpeg_from_rgb(
            self.started.elapsed().as_millis() as u64,
            size.width as u32,
            size.height as u32,
            rgb.data_bytes()?,
            self.jpeg_quality,
        )?;
        self.bus.publish(packet);
        Ok(())
    }
}

impl FrameObserver<CameraFrame> for OverlayRenderer {
    fn observe(&mut self, frame: CameraFrame, analysis: &FrameAnalysis) {
        if let Err(e) = self.render_and_publish(frame.0, analysis) {
            warn!(error = %e, "failed to render frame");
        }
    }
}
