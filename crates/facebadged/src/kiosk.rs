//! The kiosk loop: render, sample, debounce, badge, report.
//!
//! Runs on one blocking thread. Everything it does is synchronous except
//! delivery, which is handed to the dispatcher and never awaited.

use crate::presenter::Presenter;
use crate::screens::{self, Screens};
use chrono::Utc;
use facebadge_core::{
    Action, Candidate, Decision, DetectionConfig, DetectionMachine, FaceMatcher, FrameSource, Identity, Roster,
    SessionTracker, Transition,
};
use facebadge_upload::{DispatchRequest, DispatcherHandle};
use image::RgbImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct KioskSettings {
    pub detection: DetectionConfig,
    pub session_timeout: chrono::Duration,
    /// Delay between rendered animation frames.
    pub frame_interval: Duration,
    pub badge_dwell: Duration,
    pub rejection_dwell: Duration,
    pub fade_steps: u32,
    pub fade_step_delay: Duration,
    /// Black screen after a badge before the idle animation resumes.
    pub post_badge_pause: Duration,
}

impl Default for KioskSettings {
    fn default() -> Self {
        Self {
            detection: DetectionConfig::default(),
            session_timeout: chrono::Duration::hours(1),
            frame_interval: Duration::from_millis(30),
            badge_dwell: Duration::from_secs(2),
            rejection_dwell: Duration::from_secs(3),
            fade_steps: 20,
            fade_step_delay: Duration::from_millis(20),
            post_badge_pause: Duration::from_millis(500),
        }
    }
}

/// What a completed detection cycle put on screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Presented {
    Badge { identity: String, decision: Decision },
    Rejection,
}

pub struct Kiosk<S, M, P> {
    source: S,
    matcher: M,
    presenter: P,
    roster: Roster,
    screens: Screens,
    machine: DetectionMachine,
    sessions: SessionTracker,
    dispatcher: Option<DispatcherHandle>,
    settings: KioskSettings,
    running: Arc<AtomicBool>,
    /// Camera frame in which the current cycle's result was resolved.
    resolved_frame: Option<RgbImage>,
}

impl<S: FrameSource, M: FaceMatcher, P: Presenter> Kiosk<S, M, P> {
    pub fn new(source: S, matcher: M, presenter: P, roster: Roster, screens: Screens, settings: KioskSettings) -> Self {
        let detection = DetectionConfig {
            idle_frames: screens.idle_count(),
            scan_frames: screens.scan_count(),
            ..settings.detection.clone()
        };
        Self {
            source,
            matcher,
            presenter,
            roster,
            screens,
            machine: DetectionMachine::new(detection),
            sessions: SessionTracker::new(settings.session_timeout),
            dispatcher: None,
            settings,
            running: Arc::new(AtomicBool::new(true)),
            resolved_frame: None,
        }
    }

    /// Report Login/Logout actions through `handle`. Without one, sessions
    /// are still tracked but nothing leaves the kiosk.
    pub fn with_dispatcher(mut self, handle: DispatcherHandle) -> Self {
        self.dispatcher = Some(handle);
        self
    }

    /// Clearing this flag stops [`Kiosk::run`] at the next frame boundary.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub fn run(&mut self) {
        tracing::info!(identities = self.roster.len(), "kiosk loop started");
        while self.running.load(Ordering::SeqCst) {
            self.step();
            pause(self.settings.frame_interval);
        }
        if let Err(e) = self.presenter.clear() {
            tracing::warn!(error = %e, "failed to clear display");
        }
        tracing::info!("kiosk loop stopped");
    }

    /// Render one animation frame, sample the camera when due, and show the
    /// badge once a cycle resolves.
    pub fn step(&mut self) -> Option<Presented> {
        if let Some(tick) = self.machine.advance() {
            let frame = self.screens.frame(tick.screen);
            if let Err(e) = self.presenter.show(frame) {
                tracing::warn!(error = %e, "display update failed");
            }
            if tick.sample {
                self.sample();
            }
        }

        let outcome = self.machine.poll_badge()?;
        let presented = self.present(outcome);
        self.machine.finish_badge();
        self.resolved_frame = None;
        pause(self.settings.post_badge_pause);
        Some(presented)
    }

    fn sample(&mut self) {
        let frame = match self.source.capture() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(error = %e, "frame capture failed; sample skipped");
                return;
            }
        };

        match self.machine.process_frame(&mut self.matcher, &self.roster, &frame) {
            Ok(Transition::StartedScanning) => tracing::debug!("face detected; scanning"),
            Ok(Transition::ReturnedToIdle) => tracing::debug!("face lost; back to idle"),
            Ok(Transition::Resolved(candidate)) => {
                tracing::info!(candidate = %candidate, "stable recognition");
                self.resolved_frame = Some(frame);
            }
            Ok(Transition::None) => {}
            Err(e) => tracing::warn!(error = %e, "face matching failed; sample skipped"),
        }
    }

    fn present(&mut self, outcome: Candidate) -> Presented {
        let id = match outcome {
            Candidate::Unknown => {
                tracing::info!("unrecognized face; showing rejection");
                if let Err(e) = self.presenter.show(self.screens.rejection()) {
                    tracing::warn!(error = %e, "display update failed");
                }
                pause(self.settings.rejection_dwell);
                self.show_black();
                return Presented::Rejection;
            }
            Candidate::Known(id) => id,
        };

        let now = Utc::now();
        let decision = self.sessions.decide(&id, now);
        let identity = self.roster.get(&id).cloned();
        tracing::info!(
            identity = %id,
            message = decision.message.key(),
            action = decision.action.map(|a| a.as_str()),
            "showing badge"
        );

        if let Some(action) = decision.action {
            self.dispatch(action, &id, now, identity.as_ref());
        }

        let badge = self
            .screens
            .badge(&id, identity.as_ref().and_then(|i| i.avatar.as_deref()), decision.message);
        self.fade(&badge, true);
        pause(self.settings.badge_dwell);
        self.fade(&badge, false);

        Presented::Badge { identity: id, decision }
    }

    fn dispatch(&mut self, action: Action, id: &str, now: chrono::DateTime<Utc>, identity: Option<&Identity>) {
        let Some(handle) = &self.dispatcher else {
            tracing::debug!(identity = %id, action = action.as_str(), "remote logging disabled");
            return;
        };
        let (frame, reference_image) = match action {
            Action::Login => (self.resolved_frame.take(), identity.map(|i| i.reference_image.clone())),
            Action::Logout => (None, None),
        };
        handle.dispatch(DispatchRequest {
            action,
            identity_id: id.to_string(),
            timestamp: now,
            frame,
            reference_image,
        });
    }

    fn fade(&mut self, image: &RgbImage, fade_in: bool) {
        let steps = self.settings.fade_steps.max(1);
        for i in 0..=steps {
            let t = i as f32 / steps as f32;
            let level = if fade_in { t } else { 1.0 - t };
            if let Err(e) = self.presenter.show(&screens::fade(image, level)) {
                tracing::warn!(error = %e, "display update failed");
                return;
            }
            pause(self.settings.fade_step_delay);
        }
    }

    fn show_black(&mut self) {
        if let Err(e) = self.presenter.clear() {
            tracing::warn!(error = %e, "failed to clear display");
        }
    }
}

fn pause(duration: Duration) {
    if !duration.is_zero() {
        std::thread::sleep(duration);
    }
}
