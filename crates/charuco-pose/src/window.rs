//! Interactive preview window titled [`PREVIEW_TITLE`].
//!
//! The pipeline runs on a worker thread and hands frames to a
//! [`WindowPreview`]. The main thread drives the matching [`PreviewWindow`],
//! which shows each frame until a key is pressed and then releases the worker.
//!
//! Closing the window, or failing to open one, stops the pausing; the run
//! continues and later frames still reach the inner sink.

use crate::preview::{PreviewError, PreviewSink, PREVIEW_TITLE};
use eframe::egui;
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(30);

/// One annotated frame on its way to the window.
#[derive(Clone, Debug)]
pub struct PreviewFrame {
    pub index: usize,
    pub image: PathBuf,
    pub frame: RgbImage,
}

/// Connected sink/window pair. `inner` receives every frame first.
pub fn preview_window<S: PreviewSink>(inner: S) -> (WindowPreview<S>, PreviewWindow) {
    let (frame_tx, frame_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let sink = WindowPreview {
        inner,
        frames: frame_tx,
        releases: release_rx,
        closed: false,
    };
    let window = PreviewWindow {
        frames: frame_rx,
        releases: release_tx,
    };
    (sink, window)
}

/// Worker-side half: forwards each frame to the window and waits for it to
/// be released.
pub struct WindowPreview<S> {
    inner: S,
    frames: Sender<PreviewFrame>,
    releases: Receiver<()>,
    closed: bool,
}

impl<S> WindowPreview<S> {
    fn window_gone(&mut self) {
        if !self.closed {
            log::warn!("preview window closed, continuing without pausing");
            self.closed = true;
        }
    }
}

impl<S: PreviewSink> PreviewSink for WindowPreview<S> {
    fn wants_frames(&self) -> bool {
        true
    }

    fn blocks(&self) -> bool {
        true
    }

    fn show(&mut self, index: usize, image: &Path, frame: &RgbImage) -> Result<(), PreviewError> {
        self.inner.show(index, image, frame)?;
        if self.closed {
            return Ok(());
        }
        let sent = self.frames.send(PreviewFrame {
            index,
            image: image.to_path_buf(),
            frame: frame.clone(),
        });
        if sent.is_err() || self.releases.recv().is_err() {
            self.window_gone();
        }
        Ok(())
    }
}

/// Main-thread half: the receiving end of a [`WindowPreview`].
pub struct PreviewWindow {
    frames: Receiver<PreviewFrame>,
    releases: Sender<()>,
}

impl PreviewWindow {
    /// Block until the next frame arrives. `None` once the worker is done.
    pub fn next_frame(&self) -> Option<PreviewFrame> {
        self.frames.recv().ok()
    }

    pub fn try_next_frame(&self) -> Result<PreviewFrame, TryRecvError> {
        self.frames.try_recv()
    }

    /// Let the worker continue past the frame it is waiting on.
    ///
    /// Returns `false` when the worker is gone.
    pub fn release(&self) -> bool {
        self.releases.send(()).is_ok()
    }

    /// Run the window on the calling thread until the worker finishes or the
    /// window is closed.
    ///
    /// No window is opened unless at least one frame arrives.
    pub fn run(self) -> Result<(), PreviewError> {
        let Some(first) = self.next_frame() else {
            log::debug!("no frames to preview");
            return Ok(());
        };
        let viewer = Viewer {
            window: self,
            current: first,
            texture: None,
            waiting: true,
        };
        let options = eframe::NativeOptions {
            viewport: egui::ViewportBuilder::default().with_title(PREVIEW_TITLE),
            ..Default::default()
        };
        eframe::run_native(PREVIEW_TITLE, options, Box::new(move |_cc| Ok(Box::new(viewer))))
            .map_err(|err| PreviewError::Window(err.to_string()))
    }
}

struct Viewer {
    window: PreviewWindow,
    current: PreviewFrame,
    texture: Option<egui::TextureHandle>,
    waiting: bool,
}

impl Viewer {
    fn poll(&mut self, ctx: &egui::Context) {
        loop {
            match self.window.try_next_frame() {
                Ok(frame) => {
                    self.current = frame;
                    self.texture = None;
                    self.waiting = true;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !self.waiting {
                        ctx.send_viewport_cmd(egui::ViewportCommand::Close);
                    }
                    break;
                }
            }
        }
    }

    fn texture(&mut self, ctx: &egui::Context) -> egui::TextureHandle {
        let frame = &self.current.frame;
        self.texture
            .get_or_insert_with(|| {
                let size = [frame.width() as usize, frame.height() as usize];
                ctx.load_texture(
                    "preview-frame",
                    egui::ColorImage::from_rgb(size, frame.as_raw()),
                    egui::TextureOptions::LINEAR,
                )
            })
            .clone()
    }
}

impl eframe::App for Viewer {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll(ctx);

        let key_pressed = ctx.input(|i| {
            i.events
                .iter()
                .any(|e| matches!(e, egui::Event::Key { pressed: true, repeat: false, .. }))
        });
        if key_pressed && self.waiting {
            self.waiting = false;
            if !self.window.release() {
                ctx.send_viewport_cmd(egui::ViewportCommand::Close);
            }
        }

        let texture = self.texture(ctx);
        let status = if self.waiting {
            "press any key to continue"
        } else {
            "processing"
        };
        egui::CentralPanel::default().show(ctx, |ui| {
            ui.label(format!(
                "#{} {} - {status}",
                self.current.index,
                self.current.image.display()
            ));
            let image = egui::Image::new(egui::load::SizedTexture::from_handle(&texture));
            ui.add(image.shrink_to_fit());
        });

        ctx.request_repaint_after(POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preview::{DirectoryPreview, NoPreview};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn show_waits_until_the_window_releases_the_frame() {
        let (mut sink, window) = preview_window(NoPreview);
        let released = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&released);
        let host = std::thread::spawn(move || {
            let frame = window.next_frame().expect("frame");
            std::thread::sleep(Duration::from_millis(50));
            flag.store(true, Ordering::SeqCst);
            assert!(window.release());
            (frame.index, frame.image, frame.frame.dimensions())
        });

        sink.show(7, Path::new("left.png"), &RgbImage::new(3, 2)).expect("show");
        assert!(released.load(Ordering::SeqCst));
        let (index, image, dims) = host.join().expect("host");
        assert_eq!(index, 7);
        assert_eq!(image, PathBuf::from("left.png"));
        assert_eq!(dims, (3, 2));
    }

    #[test]
    fn frames_arrive_in_order_and_reach_the_inner_sink() {
        let dir = tempdir().expect("tempdir");
        let inner = DirectoryPreview::create(dir.path()).expect("create");
        let (mut sink, window) = preview_window(inner);
        let host = std::thread::spawn(move || {
            let mut seen = Vec::new();
            while let Some(frame) = window.next_frame() {
                seen.push(frame.index);
                window.release();
            }
            seen
        });

        let frame = RgbImage::new(2, 2);
        for (k, name) in ["a.png", "b.png", "c.png"].iter().enumerate() {
            sink.show(k, Path::new(name), &frame).expect("show");
        }
        drop(sink);

        assert_eq!(host.join().expect("host"), vec![0, 1, 2]);
        for name in ["0000_a.png", "0001_b.png", "0002_c.png"] {
            assert!(dir.path().join(name).exists(), "{name}");
        }
    }

    #[test]
    fn closed_window_stops_the_pausing() {
        let (mut sink, window) = preview_window(NoPreview);
        drop(window);
        let frame = RgbImage::new(2, 2);
        sink.show(0, Path::new("a.png"), &frame).expect("first");
        sink.show(1, Path::new("b.png"), &frame).expect("second");
        assert!(sink.closed);
    }

    #[test]
    fn window_without_frames_returns_at_once() {
        let (sink, window) = preview_window(NoPreview);
        drop(sink);
        window.run().expect("nothing to show");
    }
}
