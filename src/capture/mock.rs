//! Scripted in-memory driver for tests.

use super::{
    CameraDriver, CameraHandle, Capabilities, DeviceInfo, Format, NegotiatedFormat, RawFrame,
    Resolution,
};
use crate::error::{CameraError, Result};
use crate::sink::FrameSink;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Open(String),
    SetFormat(Format),
    Start,
    Stop,
}

#[derive(Default)]
struct Shared {
    events: Vec<Event>,
    sink: Option<FrameSink>,
    fail_stop: bool,
}

/// Clones share state, so a test can keep one while the controller owns another.
#[derive(Clone)]
pub struct MockDriver {
    devices: Vec<DeviceInfo>,
    resolutions: Vec<Resolution>,
    shared: Arc<Mutex<Shared>>,
}

impl MockDriver {
    pub fn with_devices(identifies: &[&str]) -> Self {
        let devices = identifies
            .iter()
            .map(|identify| DeviceInfo {
                identify: identify.to_string(),
                description: format!("Mock camera {}", identify),
                ..Default::default()
            })
            .collect();

        Self {
            devices,
            resolutions: vec![Resolution::new(640, 480), Resolution::new(1280, 720)],
            shared: Arc::default(),
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.lock().events.clone()
    }

    pub fn clear_events(&self) {
        self.lock().events.clear();
    }

    /// Make every following `stop` fail, as a wedged driver would.
    pub fn fail_stop(&self) {
        self.lock().fail_stop = true;
    }

    /// Push a buffer into the currently bound sink, as a driver thread would.
    pub fn push(&self, frame: &RawFrame) -> bool {
        match &self.lock().sink {
            Some(sink) => sink.present(frame),
            None => false,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().expect("mock state poisoned")
    }
}

impl CameraDriver for MockDriver {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(self.devices.clone())
    }

    fn open(&self, identify: &str) -> Result<Box<dyn CameraHandle>> {
        if !self.devices.iter().any(|d| d.identify == identify) {
            return Err(CameraError::DeviceNotFound {
                identify: identify.to_string(),
            });
        }

        self.lock().events.push(Event::Open(identify.to_string()));
        let default = Format::default();
        Ok(Box::new(MockHandle {
            resolutions: self.resolutions.clone(),
            shared: Arc::clone(&self.shared),
            format: NegotiatedFormat {
                width: default.width,
                height: default.height,
                layout: Some(default.encoding.layout()),
                frame_rate: default.frame_rate,
            },
            streaming: false,
        }))
    }
}

struct MockHandle {
    resolutions: Vec<Resolution>,
    shared: Arc<Mutex<Shared>>,
    format: NegotiatedFormat,
    streaming: bool,
}

impl MockHandle {
    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().expect("mock state poisoned")
    }
}

impl CameraHandle for MockHandle {
    fn capabilities(&mut self) -> Result<Capabilities> {
        Ok(Capabilities {
            resolutions: self.resolutions.clone(),
            formats: vec!["Jpeg".to_string(), "YUYV".to_string()],
        })
    }

    fn format(&mut self) -> Result<NegotiatedFormat> {
        Ok(self.format)
    }

    /// Unsupported resolutions fall back to the first supported one.
    fn set_format(&mut self, format: &Format) -> Result<NegotiatedFormat> {
        self.lock().events.push(Event::SetFormat(*format));

        let wanted = Resolution::new(format.width, format.height);
        let resolution = if self.resolutions.contains(&wanted) {
            wanted
        } else {
            self.resolutions[0]
        };

        self.format = NegotiatedFormat {
            width: resolution.width,
            height: resolution.height,
            layout: Some(format.encoding.layout()),
            frame_rate: format.frame_rate,
        };
        Ok(self.format)
    }

    fn start(&mut self, sink: FrameSink) -> Result<()> {
        let mut shared = self.lock();
        shared.events.push(Event::Start);
        shared.sink = Some(sink);
        drop(shared);
        self.streaming = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let mut shared = self.lock();
        shared.events.push(Event::Stop);
        if shared.fail_stop {
            return Err(CameraError::backend("mock", "stop failed"));
        }
        shared.sink = None;
        drop(shared);
        self.streaming = false;
        Ok(())
    }

    fn is_streaming(&self) -> bool {
        self.streaming
    }
}
