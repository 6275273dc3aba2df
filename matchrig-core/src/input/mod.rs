// File: matchrig-core/src/input/mod.rs
//
// Synthetic input against client windows. The sequencer owns all timing
// and cancellation; the raw injector behind it just changes key and mouse
// state. Cancellation always releases whatever the sequencer pressed, so
// no route can leave a key stuck down.

pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use rand::prelude::IndexedRandom;
use tracing::{debug, warn};

use matchrig_common::models::{WindowHandle, WindowRect};
use crate::cancel::{sleep_cancellable, StopSignal};
use crate::os::{InputInjector, Key, WindowSystem};
use crate::windows::focus_window;
use crate::Error;

/// Keys a route may hold; all released up front before any sequence runs.
const ROUTE_KEYS: [char; 6] = ['w', 'a', 's', 'd', 'e', '2'];

fn combo_keys(combo: &str) -> Vec<Key> {
    combo
        .split('+')
        .filter_map(|part| part.chars().next())
        .map(|c| Key::Char(c.to_ascii_lowercase()))
        .collect()
}

pub struct Sequencer {
    windows: Arc<dyn WindowSystem>,
    input: Arc<dyn InputInjector>,
}

impl Sequencer {
    pub fn new(windows: Arc<dyn WindowSystem>, input: Arc<dyn InputInjector>) -> Self {
        Self { windows, input }
    }

    /// Foreground the window without any settle pause.
    pub fn focus(&self, handle: WindowHandle) -> bool {
        focus_window(self.windows.as_ref(), handle)
    }

    /// Foreground the window and give the client a moment to take input.
    pub async fn focus_settled(&self, handle: WindowHandle) -> bool {
        if !self.focus(handle) {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(120)).await;
        true
    }

    /// Restore + foreground, with the longer settle the in-round routes
    /// need before the first key registers.
    pub async fn activate(&self, handle: WindowHandle) -> bool {
        let _ = self.windows.show_restore(handle);
        if self.windows.set_foreground(handle).is_err() {
            warn!("could not activate window {}", handle);
            return false;
        }
        tokio::time::sleep(Duration::from_millis(150)).await;
        true
    }

    /// Releases every key a route could have left down.
    pub fn reset_route_keys(&self) {
        for c in ROUTE_KEYS {
            let _ = self.input.key_up(Key::Char(c));
        }
    }

    /// Runs a scripted route against one window. Combos hold all their keys
    /// for the step duration; a stop mid-hold releases them before
    /// returning.
    pub async fn run_sequence(
        &self,
        handle: WindowHandle,
        steps: &[(&str, f32)],
        stop: Option<&StopSignal>,
    ) {
        self.reset_route_keys();

        if !self.activate(handle).await {
            return;
        }
        if sleep_cancellable(Duration::from_millis(250), stop).await {
            return;
        }

        for (combo, hold_secs) in steps {
            if stop.map(|s| s.is_triggered()).unwrap_or(false) {
                return;
            }

            let keys = combo_keys(combo);
            for key in &keys {
                let _ = self.input.key_down(*key);
            }
            let cancelled = sleep_cancellable(Duration::from_secs_f32(*hold_secs), stop).await;
            for key in &keys {
                let _ = self.input.key_up(*key);
            }
            if cancelled {
                return;
            }

            if sleep_cancellable(Duration::from_millis(50), stop).await {
                return;
            }
        }
    }

    /// Taps one random non-movement key before a long route, to knock the
    /// client out of any lingering UI focus.
    pub async fn press_random_pre_key(&self, handle: WindowHandle, stop: Option<&StopSignal>) {
        if stop.map(|s| s.is_triggered()).unwrap_or(false) {
            return;
        }
        if !self.activate(handle).await {
            return;
        }
        if sleep_cancellable(Duration::from_millis(150), stop).await {
            return;
        }

        if let Some(&key) = routes::PRE_ROUTE_KEYS.choose(&mut rand::rng()) {
            debug!("pre-route key '{}'", key);
            if let Err(e) = self.input.tap(Key::Char(key)) {
                warn!("pre-route key press failed: {}", e);
            }
        }

        sleep_cancellable(Duration::from_millis(100), stop).await;
    }

    /// Holds ctrl and taps the attack key until `until` reports the round
    /// is done. Both keys are released on the way out no matter how the
    /// loop ends.
    pub async fn spam_attack_key(&self, handle: WindowHandle, until: impl Fn() -> bool + Send) {
        self.reset_route_keys();
        if !self.activate(handle).await {
            return;
        }

        let _ = self.input.key_down(Key::Ctrl);
        tokio::time::sleep(Duration::from_millis(50)).await;

        while !until() {
            let _ = self.input.tap(Key::Char('k'));
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let _ = self.input.key_up(Key::Ctrl);
        let _ = self.input.key_up(Key::Char('k'));
    }

    /// Hover-then-click at a window-relative point, reading the rect fresh
    /// so a just-moved window is clicked where it is now.
    pub async fn click_at(&self, handle: WindowHandle, x: i32, y: i32, hover: Duration) {
        let Ok(rect) = self.windows.window_rect(handle) else {
            return;
        };
        let (abs_x, abs_y) = rect.to_screen(x, y);
        let _ = self.input.move_cursor(abs_x, abs_y);
        tokio::time::sleep(hover).await;
        let _ = self.input.mouse_down();
        let _ = self.input.mouse_up();
    }

    /// Focus-then-click against a rect captured earlier by the caller.
    /// Returns false when cancelled mid-click.
    pub async fn click_rel(
        &self,
        handle: WindowHandle,
        rect: &WindowRect,
        x: i32,
        y: i32,
        stop: Option<&StopSignal>,
    ) -> bool {
        if stop.map(|s| s.is_triggered()).unwrap_or(false) {
            return false;
        }
        self.focus(handle);
        let (abs_x, abs_y) = rect.to_screen(x, y);
        let _ = self.input.move_cursor(abs_x, abs_y);
        if sleep_cancellable(Duration::from_millis(30), stop).await {
            return false;
        }
        let _ = self.input.mouse_down();
        if sleep_cancellable(Duration::from_millis(30), stop).await {
            return false;
        }
        let _ = self.input.mouse_up();
        true
    }

    /// Cursor move in client-area coordinates.
    pub fn move_client(&self, handle: WindowHandle, x: i32, y: i32) -> Result<(), Error> {
        let client = self.windows.client_rect(handle)?;
        let (abs_x, abs_y) = client.to_screen(x, y);
        self.input.move_cursor(abs_x, abs_y)
    }

    /// Instant click in client-area coordinates.
    pub fn click_client(&self, handle: WindowHandle, x: i32, y: i32) -> Result<(), Error> {
        self.move_client(handle, x, y)?;
        self.input.mouse_down()?;
        self.input.mouse_up()
    }

    /// Escape posted straight to the window's queue, no focus change.
    pub fn send_escape(&self, handle: WindowHandle) {
        let _ = self.input.post_key_down(handle, Key::Escape);
        let _ = self.input.post_key_up(handle, Key::Escape);
    }

    /// Two paced escapes, the rhythm the in-game menu needs to close both
    /// layers. Returns false when cancelled.
    pub async fn double_escape(&self, handle: WindowHandle, stop: Option<&StopSignal>) -> bool {
        for _ in 0..2 {
            let _ = self.input.post_key_down(handle, Key::Escape);
            if sleep_cancellable(Duration::from_millis(50), stop).await {
                return false;
            }
            let _ = self.input.post_key_up(handle, Key::Escape);
            if sleep_cancellable(Duration::from_millis(100), stop).await {
                return false;
            }
        }
        true
    }

    /// Paste-from-clipboard chord.
    pub fn paste(&self) {
        if let Err(e) = self.input.paste() {
            warn!("paste failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use crate::os::MockWindowSystem;

    /// Records every injector call in order.
    #[derive(Default)]
    struct RecordingInput {
        events: Mutex<Vec<String>>,
    }

    impl RecordingInput {
        fn events(&self) -> Vec<String> {
            self.events.lock().clone()
        }

        fn push(&self, event: String) {
            self.events.lock().push(event);
        }
    }

    impl InputInjector for RecordingInput {
        fn key_down(&self, key: Key) -> Result<(), Error> {
            self.push(format!("down {}", key));
            Ok(())
        }
        fn key_up(&self, key: Key) -> Result<(), Error> {
            self.push(format!("up {}", key));
            Ok(())
        }
        fn tap(&self, key: Key) -> Result<(), Error> {
            self.push(format!("tap {}", key));
            Ok(())
        }
        fn move_cursor(&self, x: i32, y: i32) -> Result<(), Error> {
            self.push(format!("move {},{}", x, y));
            Ok(())
        }
        fn mouse_down(&self) -> Result<(), Error> {
            self.push("mouse down".into());
            Ok(())
        }
        fn mouse_up(&self) -> Result<(), Error> {
            self.push("mouse up".into());
            Ok(())
        }
        fn post_key_down(&self, _window: WindowHandle, key: Key) -> Result<(), Error> {
            self.push(format!("post down {}", key));
            Ok(())
        }
        fn post_key_up(&self, _window: WindowHandle, key: Key) -> Result<(), Error> {
            self.push(format!("post up {}", key));
            Ok(())
        }
        fn paste(&self) -> Result<(), Error> {
            self.push("paste".into());
            Ok(())
        }
    }

    fn permissive_windows() -> MockWindowSystem {
        let mut windows = MockWindowSystem::new();
        windows.expect_show_restore().returning(|_| Ok(()));
        windows.expect_set_foreground().returning(|_| Ok(()));
        windows
            .expect_window_rect()
            .returning(|_| Ok(WindowRect::new(100, 200, 483, 480)));
        windows
            .expect_client_rect()
            .returning(|_| Ok(WindowRect::new(110, 230, 493, 510)));
        windows
    }

    fn sequencer_with(windows: MockWindowSystem) -> (Sequencer, Arc<RecordingInput>) {
        let input = Arc::new(RecordingInput::default());
        let seq = Sequencer::new(Arc::new(windows), input.clone());
        (seq, input)
    }

    #[test]
    fn combos_split_on_plus() {
        assert_eq!(combo_keys("A+W"), vec![Key::Char('a'), Key::Char('w')]);
        assert_eq!(combo_keys("D"), vec![Key::Char('d')]);
        assert_eq!(combo_keys("2"), vec![Key::Char('2')]);
    }

    #[tokio::test]
    async fn sequence_presses_combo_keys_together() {
        let (seq, input) = sequencer_with(permissive_windows());
        seq.run_sequence(WindowHandle(1), &[("A+W", 0.0), ("D", 0.0)], None)
            .await;

        let events = input.events();
        // Reset releases every route key up front.
        assert_eq!(&events[..6], &[
            "up w", "up a", "up s", "up d", "up e", "up 2",
        ]);
        let tail: Vec<_> = events[6..].iter().map(String::as_str).collect();
        assert_eq!(
            tail,
            vec!["down a", "down w", "up a", "up w", "down d", "up d"]
        );
    }

    #[tokio::test]
    async fn cancel_mid_hold_releases_held_keys() {
        let (seq, input) = sequencer_with(permissive_windows());
        let seq = Arc::new(seq);
        let stop = Arc::new(StopSignal::new());

        let task = {
            let seq = seq.clone();
            let stop = stop.clone();
            tokio::spawn(async move {
                seq.run_sequence(WindowHandle(1), &[("A+W", 30.0), ("D", 1.0)], Some(&stop))
                    .await;
            })
        };

        tokio::time::sleep(Duration::from_millis(500)).await;
        stop.trigger();
        task.await.unwrap();

        let events = input.events();
        assert_eq!(&events[events.len() - 2..], &["up a", "up w"]);
        assert!(!events.contains(&"down d".to_string()));
    }

    #[tokio::test]
    async fn pre_triggered_stop_skips_all_presses() {
        let (seq, input) = sequencer_with(permissive_windows());
        let stop = StopSignal::new();
        stop.trigger();
        seq.run_sequence(WindowHandle(1), &[("A", 1.0)], Some(&stop))
            .await;

        let events = input.events();
        assert!(events.iter().all(|e| e.starts_with("up ")));
    }

    #[tokio::test]
    async fn attack_spam_holds_ctrl_and_releases_both_keys() {
        let (seq, input) = sequencer_with(permissive_windows());
        let taps = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let taps_in_closure = taps.clone();

        seq.spam_attack_key(WindowHandle(1), move || {
            taps_in_closure.fetch_add(1, std::sync::atomic::Ordering::SeqCst) >= 3
        })
        .await;

        let events = input.events();
        let ctrl_down = events.iter().position(|e| e == "down ctrl").unwrap();
        let first_tap = events.iter().position(|e| e == "tap k").unwrap();
        assert!(ctrl_down < first_tap);
        assert_eq!(&events[events.len() - 2..], &["up ctrl", "up k"]);
        assert_eq!(events.iter().filter(|e| *e == "tap k").count(), 3);
    }

    #[tokio::test]
    async fn double_escape_posts_paced_pairs() {
        let (seq, input) = sequencer_with(MockWindowSystem::new());
        assert!(seq.double_escape(WindowHandle(1), None).await);
        assert_eq!(
            input.events(),
            vec!["post down esc", "post up esc", "post down esc", "post up esc"]
        );
    }

    #[tokio::test]
    async fn window_clicks_translate_to_screen_coordinates() {
        let (seq, input) = sequencer_with(permissive_windows());
        seq.click_at(WindowHandle(1), 289, 271, Duration::from_millis(1))
            .await;
        assert_eq!(
            input.events(),
            vec!["move 389,471", "mouse down", "mouse up"]
        );
    }

    #[test]
    fn client_clicks_use_client_origin() {
        let (seq, input) = sequencer_with(permissive_windows());
        seq.click_client(WindowHandle(1), 375, 8).unwrap();
        assert_eq!(
            input.events(),
            vec!["move 485,238", "mouse down", "mouse up"]
        );
    }

    #[tokio::test]
    async fn pre_key_taps_one_of_the_known_keys() {
        let (seq, input) = sequencer_with(permissive_windows());
        seq.press_random_pre_key(WindowHandle(1), None).await;

        let events = input.events();
        let tap = events.iter().find(|e| e.starts_with("tap ")).unwrap();
        let key = tap.trim_start_matches("tap ").chars().next().unwrap();
        assert!(routes::PRE_ROUTE_KEYS.contains(&key));
    }
}
