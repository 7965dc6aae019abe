//! In-crate doubles for the external collaborators, used by unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::errors::{OperatorError, OperatorResult};
use crate::executor::input::InputDriver;
use crate::llm::provider::LlmProvider;
use crate::llm::types::{CallConfig, ChatMessage, LlmResponse};
use crate::perception::traits::{ElementDetector, ScreenCapture};
use crate::perception::types::{LabelMap, Screenshot, ScreenshotMeta};
use crate::StopHandle;

/// Records every primitive as a short string, e.g. `"click 960,648"`.
#[derive(Default)]
pub struct RecordingDriver {
    events: Mutex<Vec<String>>,
    failing_key: Option<String>,
    failing_click: bool,
}

impl RecordingDriver {
    /// A driver whose `key_down` fails for `key`.
    pub fn failing_key(key: &str) -> Self {
        Self {
            failing_key: Some(key.to_string()),
            ..Self::default()
        }
    }

    /// A driver whose `click` always fails.
    pub fn failing_clicks() -> Self {
        Self {
            failing_click: true,
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl InputDriver for RecordingDriver {
    fn cursor_position(&self) -> OperatorResult<(i32, i32)> {
        Ok((0, 0))
    }

    fn move_to(&self, x: i32, y: i32) -> OperatorResult<()> {
        self.record(format!("move {x},{y}"));
        Ok(())
    }

    fn click(&self, x: i32, y: i32) -> OperatorResult<()> {
        if self.failing_click {
            return Err(OperatorError::Executor("simulated click failure".into()));
        }
        self.record(format!("click {x},{y}"));
        Ok(())
    }

    fn scroll(&self, clicks: i32) -> OperatorResult<()> {
        self.record(format!("scroll {clicks}"));
        Ok(())
    }

    fn key_down(&self, key: &str) -> OperatorResult<()> {
        if self.failing_key.as_deref() == Some(key) {
            return Err(OperatorError::Executor(format!("simulated failure on '{key}'")));
        }
        self.record(format!("down {key}"));
        Ok(())
    }

    fn key_up(&self, key: &str) -> OperatorResult<()> {
        self.record(format!("up {key}"));
        Ok(())
    }

    fn type_text(&self, text: &str) -> OperatorResult<()> {
        self.record(format!("type {text}"));
        Ok(())
    }
}

/// Replays scripted replies in order and keeps every transcript it was sent.
/// Once the script is exhausted the last reply repeats.
pub struct MockProvider {
    replies: Mutex<VecDeque<OperatorResult<String>>>,
    last: Mutex<Option<String>>,
    pub calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl MockProvider {
    pub fn new(replies: Vec<&str>) -> Self {
        Self::scripted(replies.into_iter().map(|r| Ok(r.to_string())).collect())
    }

    pub fn scripted(replies: Vec<OperatorResult<String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            last: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn call(&self, idx: usize) -> Vec<ChatMessage> {
        self.calls.lock().unwrap()[idx].clone()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn chat(&self, messages: Vec<ChatMessage>, _cfg: &CallConfig) -> OperatorResult<LlmResponse> {
        self.calls.lock().unwrap().push(messages);
        let next = self.replies.lock().unwrap().pop_front();
        let reply = match next {
            Some(reply) => reply?,
            None => self
                .last
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| OperatorError::LlmProvider("mock script empty".into()))?,
        };
        *self.last.lock().unwrap() = Some(reply.clone());
        Ok(LlmResponse {
            content: reply,
            reasoning: String::new(),
            session_token: Some(format!("resp-{}", self.call_count())),
        })
    }
}

/// A blank 1920×1080 screen. Optionally requests a stop on the n-th capture,
/// which simulates an operator pressing stop while the capture is in flight.
pub struct MockScreen {
    meta: ScreenshotMeta,
    captures: AtomicUsize,
    pub regions: Mutex<Vec<(i32, i32, u32)>>,
    stop_on_capture: Option<(usize, StopHandle)>,
}

impl MockScreen {
    pub fn new() -> Self {
        Self {
            meta: ScreenshotMeta::unscaled(1920, 1080),
            captures: AtomicUsize::new(0),
            regions: Mutex::new(Vec::new()),
            stop_on_capture: None,
        }
    }

    pub fn stopping_on(capture: usize, stop: StopHandle) -> Self {
        Self {
            stop_on_capture: Some((capture, stop)),
            ..Self::new()
        }
    }

    pub fn capture_count(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }

    fn frame(&self) -> Screenshot {
        Screenshot {
            image_bytes: tiny_png(),
            image_base64: "SCREEN".into(),
            meta: self.meta,
        }
    }
}

#[async_trait]
impl ScreenCapture for MockScreen {
    async fn capture(&self) -> OperatorResult<Screenshot> {
        let n = self.captures.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((at, stop)) = &self.stop_on_capture {
            if *at == n {
                stop.stop();
            }
        }
        Ok(self.frame())
    }

    async fn capture_region(&self, x: i32, y: i32, size: u32) -> OperatorResult<Screenshot> {
        self.regions.lock().unwrap().push((x, y, size));
        Ok(Screenshot {
            image_base64: "CLOSEUP".into(),
            ..self.frame()
        })
    }
}

/// Always returns the same label map.
pub struct FixedDetector(pub LabelMap);

#[async_trait]
impl ElementDetector for FixedDetector {
    async fn detect(&self, _image_bytes: &[u8]) -> OperatorResult<LabelMap> {
        Ok(self.0.clone())
    }
}

fn tiny_png() -> Vec<u8> {
    let mut out = Vec::new();
    image::DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(192, 108, image::Rgba([30, 30, 30, 255])))
        .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
        .unwrap();
    out
}
