use crate::metadata::CaptureMetadata;
use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use webrtc_patcher::capture::{
    CaptureCallback, CaptureResult, DesktopCapturer, Frame, FrameSize, WindowId,
};
use webrtc_patcher::linux;

/// Keeps the latest result of each capture call.
#[derive(Clone, Default)]
struct LastResult(Rc<RefCell<Option<(CaptureResult, Option<Frame>)>>>);

impl CaptureCallback for LastResult {
    fn on_capture_result(&mut self, result: CaptureResult, frame: Option<Frame>) {
        *self.0.borrow_mut() = Some((result, frame));
    }
}

impl LastResult {
    fn take(&self) -> Option<(CaptureResult, Option<Frame>)> {
        self.0.borrow_mut().take()
    }
}

fn save_png(frame: &Frame, output: &Path) -> Result<()> {
    let image = image::RgbaImage::from_raw(frame.width(), frame.height(), frame.to_rgba())
        .context("Frame buffer does not match its size")?;
    image
        .save(output)
        .with_context(|| format!("Failed to save {:?}", output))
}

pub fn capture_window(
    display: Option<&str>,
    window: WindowId,
    output: &Path,
    frames: u32,
) -> Result<()> {
    let sink = LastResult::default();
    let mut capturer = linux::create_capturer(display)?;
    capturer.start(Box::new(sink.clone()));
    capturer.select_source(window);

    println!("Capturing window {window:#x} to {}", output.display());

    let pb = ProgressBar::new(frames as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} frames ({eta})")?
            .progress_chars("#>-"),
    );

    let mut metadata = CaptureMetadata::new(window, frames);
    let mut last_frame = None;
    let start = Instant::now();

    for _ in 0..frames {
        capturer.capture_frame();
        match sink.take() {
            Some((CaptureResult::Success, Some(frame))) => {
                metadata.frames_captured += 1;
                last_frame = Some(frame);
            }
            Some((CaptureResult::ErrorTemporary, _)) => metadata.temporary_errors += 1,
            Some((result, _)) => {
                metadata.permanent_errors += 1;
                warn!(?result, "capture failed permanently");
                break;
            }
            None => bail!("Capturer delivered no result"),
        }
        pb.inc(1);
    }

    metadata.elapsed_ms = start.elapsed().as_millis() as u64;
    pb.finish_and_clear();

    let Some(frame) = last_frame else {
        bail!("No frame captured from window {window:#x}");
    };
    metadata.width = frame.width();
    metadata.height = frame.height();

    save_png(&frame, output)?;
    metadata.save(output)?;

    println!(
        "Saved {}x{} frame to {}",
        frame.width(),
        frame.height(),
        output.display()
    );
    println!(
        "  {} of {} frames captured",
        metadata.frames_captured, metadata.frames_requested
    );
    if let Some(avg) = metadata.average_frame_ms() {
        println!("  {avg:.2} ms per frame");
    }
    Ok(())
}

pub fn watch_window(display: Option<&str>, window: WindowId, interval: Duration) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    let sink = LastResult::default();
    let mut capturer = linux::create_capturer(display)?;
    capturer.start(Box::new(sink.clone()));
    capturer.select_source(window);

    println!("Watching window {window:#x}");
    println!("Press Ctrl+C to stop...\n");

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg} {elapsed_precise}")?);

    let mut size: Option<FrameSize> = None;
    let mut captured = 0u64;

    while running.load(Ordering::SeqCst) {
        capturer.capture_frame();
        match sink.take() {
            Some((CaptureResult::Success, Some(frame))) => {
                captured += 1;
                if size != Some(frame.size) {
                    info!(
                        width = frame.width(),
                        height = frame.height(),
                        "window size changed"
                    );
                    size = Some(frame.size);
                }
            }
            Some((CaptureResult::ErrorTemporary, _)) => warn!("temporary capture error"),
            Some((result, _)) => {
                warn!(?result, "window can no longer be captured");
                break;
            }
            None => bail!("Capturer delivered no result"),
        }

        let (w, h) = size.map_or((0, 0), |s| (s.width, s.height));
        pb.set_message(format!("{captured} frames, {w}x{h}"));
        pb.tick();
        std::thread::sleep(interval);
    }

    pb.finish_and_clear();
    println!("Captured {captured} frames");
    Ok(())
}
