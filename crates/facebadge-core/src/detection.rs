//! The kiosk detection cycle: Idle → Scanning → ShowingBadge → Idle.
//!
//! The machine is driven one rendered animation frame at a time by
//! [`DetectionMachine::advance`]. Every `sample_stride` frames the caller
//! grabs a camera frame and feeds it through [`DetectionMachine::process_frame`]
//! (or an already-computed [`Observation`] through [`DetectionMachine::observe`]).
//! Noisy per-frame candidates are debounced into one stable outcome per cycle.

use crate::matcher::{self, FaceMatcher, MatcherError};
use crate::roster::Roster;
use crate::types::{Candidate, MatchOutcome};
use image::imageops::FilterType;
use image::RgbImage;
use std::borrow::Cow;

/// Tuning for the detection cycle.
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    /// Rendered frames between matcher calls.
    pub sample_stride: u32,
    /// Consecutive identical candidates required for a stable result.
    pub stability_threshold: u32,
    /// Maximum embedding distance accepted as a match (exclusive).
    pub tolerance: f32,
    /// Scale applied to camera frames before embedding while scanning (1.0 = full size).
    pub downscale: f32,
    /// Number of frames in the idle animation.
    pub idle_frames: usize,
    /// Number of frames in the scan animation; the badge waits for this loop to wrap.
    pub scan_frames: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            sample_stride: 3,
            stability_threshold: 3,
            tolerance: 1.0,
            downscale: 1.0,
            idle_frames: 1,
            scan_frames: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectionState {
    Idle,
    Scanning,
    ShowingBadge(Candidate),
}

/// Animation frame to render for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Idle(usize),
    Scan(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub screen: Screen,
    /// Whether the caller should capture and process a camera frame this tick.
    pub sample: bool,
}

/// What one camera sample showed.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    NoFace,
    /// One outcome per embedded face. Empty when only locating (Idle).
    Faces(Vec<MatchOutcome>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    None,
    StartedScanning,
    ReturnedToIdle,
    Resolved(Candidate),
}

/// Run of identical consecutive candidates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Streak {
    candidate: Option<Candidate>,
    count: u32,
}

impl Streak {
    pub fn candidate(&self) -> Option<&Candidate> {
        self.candidate.as_ref()
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    fn push(&mut self, candidate: Candidate) -> u32 {
        if self.candidate.as_ref() == Some(&candidate) {
            self.count += 1;
        } else {
            self.candidate = Some(candidate);
            self.count = 1;
        }
        self.count
    }

    fn reset(&mut self) {
        self.candidate = None;
        self.count = 0;
    }
}

pub struct DetectionMachine {
    config: DetectionConfig,
    state: DetectionState,
    idle_index: usize,
    scan_index: usize,
    frame_counter: u64,
    streak: Streak,
    resolved: Option<Candidate>,
}

impl DetectionMachine {
    pub fn new(mut config: DetectionConfig) -> Self {
        config.sample_stride = config.sample_stride.max(1);
        config.stability_threshold = config.stability_threshold.max(1);
        config.idle_frames = config.idle_frames.max(1);
        config.scan_frames = config.scan_frames.max(1);
        Self {
            config,
            state: DetectionState::Idle,
            idle_index: 0,
            scan_index: 0,
            frame_counter: 0,
            streak: Streak::default(),
            resolved: None,
        }
    }

    pub fn state(&self) -> &DetectionState {
        &self.state
    }

    pub fn streak(&self) -> &Streak {
        &self.streak
    }

    /// Outcome accepted in the current scan cycle, if any.
    pub fn resolved(&self) -> Option<&Candidate> {
        self.resolved.as_ref()
    }

    /// Step one rendered frame. Returns `None` while a badge is showing.
    pub fn advance(&mut self) -> Option<Tick> {
        let screen = match self.state {
            DetectionState::Idle => {
                let screen = Screen::Idle(self.idle_index);
                self.idle_index = (self.idle_index + 1) % self.config.idle_frames;
                screen
            }
            DetectionState::Scanning => {
                let screen = Screen::Scan(self.scan_index);
                self.scan_index = (self.scan_index + 1) % self.config.scan_frames;
                screen
            }
            DetectionState::ShowingBadge(_) => return None,
        };

        self.frame_counter += 1;
        Some(Tick {
            screen,
            sample: self.frame_counter % u64::from(self.config.sample_stride) == 0,
        })
    }

    /// Feed one sample's result into the machine.
    pub fn observe(&mut self, observation: Observation) -> Transition {
        match self.state {
            DetectionState::Idle => match observation {
                Observation::NoFace => Transition::None,
                Observation::Faces(_) => {
                    self.enter_scanning();
                    Transition::StartedScanning
                }
            },
            DetectionState::Scanning => match observation {
                // Keep a resolved result even if the face moved away.
                Observation::NoFace if self.resolved.is_some() => Transition::None,
                Observation::NoFace => {
                    self.return_to_idle();
                    Transition::ReturnedToIdle
                }
                Observation::Faces(outcomes) => {
                    let candidate = pick_candidate(&outcomes);
                    let count = self.streak.push(candidate.clone());
                    if count >= self.config.stability_threshold && self.resolved.is_none() {
                        self.resolved = Some(candidate.clone());
                        Transition::Resolved(candidate)
                    } else {
                        Transition::None
                    }
                }
            },
            DetectionState::ShowingBadge(_) => Transition::None,
        }
    }

    /// Run the matcher on a captured frame and feed the result in.
    ///
    /// Idle only locates faces; Scanning embeds and classifies each one
    /// against the roster.
    pub fn process_frame<M: FaceMatcher + ?Sized>(
        &mut self,
        matcher: &mut M,
        roster: &Roster,
        frame: &RgbImage,
    ) -> Result<Transition, MatcherError> {
        let observation = match self.state {
            DetectionState::Idle => {
                if matcher.locate(frame)?.is_empty() {
                    Observation::NoFace
                } else {
                    Observation::Faces(Vec::new())
                }
            }
            DetectionState::Scanning => {
                let scaled = downscale(frame, self.config.downscale);
                let samples = matcher.samples(&scaled)?;
                if samples.is_empty() {
                    Observation::NoFace
                } else {
                    Observation::Faces(
                        samples
                            .iter()
                            .map(|s| {
                                matcher::classify(
                                    &*matcher,
                                    &s.embedding,
                                    roster.identities(),
                                    self.config.tolerance,
                                )
                            })
                            .collect(),
                    )
                }
            }
            DetectionState::ShowingBadge(_) => return Ok(Transition::None),
        };
        Ok(self.observe(observation))
    }

    /// Once a result is resolved and the scan animation wraps around,
    /// enter ShowingBadge and hand back the outcome to display.
    pub fn poll_badge(&mut self) -> Option<Candidate> {
        if self.state != DetectionState::Scanning {
            return None;
        }
        let outcome = self.resolved.clone()?;
        if self.scan_index == 0 && self.frame_counter > u64::from(self.config.sample_stride) {
            self.state = DetectionState::ShowingBadge(outcome.clone());
            Some(outcome)
        } else {
            None
        }
    }

    /// The badge (or rejection) dwell is over; start a fresh cycle.
    pub fn finish_badge(&mut self) {
        if matches!(self.state, DetectionState::ShowingBadge(_)) {
            self.return_to_idle();
        }
    }

    fn enter_scanning(&mut self) {
        self.state = DetectionState::Scanning;
        self.streak.reset();
        self.resolved = None;
        self.scan_index = 0;
        self.frame_counter = 0;
    }

    fn return_to_idle(&mut self) {
        self.state = DetectionState::Idle;
        self.streak.reset();
        self.resolved = None;
        self.frame_counter = 0;
    }
}

/// Closest matched face wins; with no match in the frame the sample is UNKNOWN.
fn pick_candidate(outcomes: &[MatchOutcome]) -> Candidate {
    outcomes
        .iter()
        .filter(|o| o.is_match())
        .min_by(|a, b| a.distance.total_cmp(&b.distance))
        .map(|o| o.candidate.clone())
        .unwrap_or(Candidate::Unknown)
}

fn downscale(frame: &RgbImage, factor: f32) -> Cow<'_, RgbImage> {
    if !(factor > 0.0 && factor < 1.0) {
        return Cow::Borrowed(frame);
    }
    let width = ((frame.width() as f32 * factor).round() as u32).max(1);
    let height = ((frame.height() as f32 * factor).round() as u32).max(1);
    Cow::Owned(image::imageops::resize(frame, width, height, FilterType::Triangle))
}
