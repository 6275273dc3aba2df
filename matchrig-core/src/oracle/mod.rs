// File: matchrig-core/src/oracle/mod.rs
//
// Pixel-sampled state oracle for the in-game accept control. The control's
// screen position is only known relative to a client window, so every check
// resolves the window rect first and samples a small block at the offset.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use matchrig_common::models::{ButtonState, Rgb, WindowHandle, WindowRect};

use crate::cancel::{StopSignal, sleep_cancellable};
use crate::input::Sequencer;
use crate::os::{PixelSampler, WindowSystem};
use crate::registry::ManagedAccount;
use crate::windows::WindowResolver;

/// Channel dominance margin used to call a color red or green.
const DOMINANCE: i32 = 20;

/// Classifies a sampled color into a control state. A channel must beat both
/// others by `DOMINANCE` to count; anything ambiguous is `Unknown`, and
/// callers that need a binary answer treat `Unknown` as not-green.
pub fn classify(color: Rgb) -> ButtonState {
    let r = color.r as i32;
    let g = color.g as i32;
    let b = color.b as i32;
    if r > g + DOMINANCE && r > b + DOMINANCE {
        ButtonState::Red
    } else if g > r + DOMINANCE && g > b + DOMINANCE {
        ButtonState::Green
    } else {
        ButtonState::Unknown
    }
}

pub struct AcceptOracle {
    windows: Arc<dyn WindowSystem>,
    sampler: Arc<dyn PixelSampler>,
    capture_warned: AtomicBool,
    state_warned: AtomicBool,
}

impl AcceptOracle {
    pub fn new(windows: Arc<dyn WindowSystem>, sampler: Arc<dyn PixelSampler>) -> Self {
        Self {
            windows,
            sampler,
            capture_warned: AtomicBool::new(false),
            state_warned: AtomicBool::new(false),
        }
    }

    /// Samples the control at a window-relative point using an already-known
    /// rect. `None` means the screen could not be read at all, which callers
    /// must treat differently from a red control.
    pub fn state_at(&self, rect: &WindowRect, point: (i32, i32)) -> Option<ButtonState> {
        let (sx, sy) = rect.to_screen(point.0, point.1);
        match self.sampler.sample_block(sx, sy) {
            Ok(color) => Some(classify(color)),
            Err(e) => {
                if !self.capture_warned.swap(true, Ordering::Relaxed) {
                    warn!("pixel sampling unavailable: {}", e);
                }
                None
            }
        }
    }

    /// Samples the control with a fresh rect lookup for `handle`.
    pub fn control_state(&self, handle: WindowHandle, point: (i32, i32)) -> Option<ButtonState> {
        let rect = self.windows.window_rect(handle).ok()?;
        self.state_at(&rect, point)
    }

    /// Clicks every member's control that reads red. With `enforce` set,
    /// keeps re-checking until all readable controls are green or `max_wait`
    /// runs out; otherwise a single corrective pass is made. Members without
    /// a resolvable window are skipped. Returns false only on timeout or
    /// cancellation.
    pub async fn force_green(
        &self,
        members: &[Arc<ManagedAccount>],
        resolver: &WindowResolver,
        sequencer: &Sequencer,
        point: (i32, i32),
        enforce: bool,
        max_wait: Duration,
        stop: Option<&StopSignal>,
    ) -> bool {
        if members.is_empty() {
            return true;
        }
        let deadline = Instant::now() + max_wait;
        loop {
            if stop.map(|s| s.is_triggered()).unwrap_or(false) {
                return false;
            }
            let mut all_green = true;
            let mut any_red = false;
            for account in members {
                let Some((handle, rect)) = resolver.window_with_rect(account) else {
                    debug!("[{}] no window for control check", account.login());
                    continue;
                };
                match self.state_at(&rect, point) {
                    Some(state) if state.is_green() => {}
                    Some(ButtonState::Red) => {
                        any_red = true;
                        all_green = false;
                        if !sequencer.click_rel(handle, &rect, point.0, point.1, stop).await {
                            return false;
                        }
                        if sleep_cancellable(Duration::from_millis(100), stop).await {
                            return false;
                        }
                    }
                    // Indeterminate colors are never clicked; the control may
                    // be mid-animation or covered by another surface.
                    _ => {
                        all_green = false;
                        if !self.state_warned.swap(true, Ordering::Relaxed) {
                            warn!("could not determine control color for [{}]", account.login());
                        }
                    }
                }
            }
            if !enforce {
                return true;
            }
            if all_green {
                return true;
            }
            if Instant::now() >= deadline {
                warn!("controls still not green after {:?}", max_wait);
                return false;
            }
            if !any_red && sleep_cancellable(Duration::from_millis(150), stop).await {
                return false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::os::{MockPixelSampler, MockWindowSystem};
    use matchrig_common::Error;

    #[test]
    fn red_dominant_is_red() {
        assert_eq!(classify(Rgb { r: 200, g: 40, b: 40 }), ButtonState::Red);
    }

    #[test]
    fn green_dominant_is_green() {
        assert_eq!(classify(Rgb { r: 40, g: 200, b: 40 }), ButtonState::Green);
    }

    #[test]
    fn ambiguous_is_unknown() {
        assert_eq!(classify(Rgb { r: 100, g: 100, b: 100 }), ButtonState::Unknown);
        // dominance must exceed the margin, not merely meet it
        assert_eq!(classify(Rgb { r: 120, g: 100, b: 100 }), ButtonState::Unknown);
        assert_eq!(classify(Rgb { r: 121, g: 100, b: 100 }), ButtonState::Red);
    }

    #[test]
    fn state_at_samples_screen_coordinates() {
        let mut sampler = MockPixelSampler::new();
        sampler
            .expect_sample_block()
            .withf(|x, y| (*x, *y) == (100 + 289, 50 + 271))
            .returning(|_, _| Ok(Rgb { r: 10, g: 220, b: 10 }));

        let oracle = AcceptOracle::new(Arc::new(MockWindowSystem::new()), Arc::new(sampler));
        let rect = WindowRect { left: 100, top: 50, right: 483, bottom: 330 };
        assert_eq!(oracle.state_at(&rect, (289, 271)), Some(ButtonState::Green));
    }

    #[test]
    fn capture_failure_yields_none_and_warns_once() {
        let mut sampler = MockPixelSampler::new();
        sampler
            .expect_sample_block()
            .times(2)
            .returning(|_, _| Err(Error::Capture("no screen".into())));

        let oracle = AcceptOracle::new(Arc::new(MockWindowSystem::new()), Arc::new(sampler));
        let rect = WindowRect { left: 0, top: 0, right: 383, bottom: 280 };
        assert_eq!(oracle.state_at(&rect, (10, 10)), None);
        assert_eq!(oracle.state_at(&rect, (10, 10)), None);
        assert!(oracle.capture_warned.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn force_green_with_no_members_is_trivially_true() {
        let oracle = AcceptOracle::new(
            Arc::new(MockWindowSystem::new()),
            Arc::new(MockPixelSampler::new()),
        );
        let resolver = WindowResolver::new(
            Arc::new(MockWindowSystem::new()),
            Arc::new(crate::os::MockProcessApi::new()),
            &crate::AppConfig::default(),
        );
        let sequencer = Sequencer::new(
            Arc::new(MockWindowSystem::new()),
            Arc::new(crate::test_utils::ScriptedInput::new()),
        );
        let ok = oracle
            .force_green(&[], &resolver, &sequencer, (289, 271), true, Duration::from_secs(1), None)
            .await;
        assert!(ok);
    }
}
