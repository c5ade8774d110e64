use gqlfinder_scanner::TabId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub const BADGE_COLOR: &str = "#2563eb";

/// Per-tab text label on the toolbar action.
pub trait Badge: Send {
    fn set_text(&mut self, tab_id: TabId, text: &str);
    fn set_background_color(&mut self, tab_id: TabId, color: &str);
}

/// Show `count`, or nothing when it is zero.
pub fn update_badge<B: Badge + ?Sized>(badge: &mut B, tab_id: TabId, count: usize) {
    let text = if count > 0 {
        count.to_string()
    } else {
        String::new()
    };
    badge.set_text(tab_id, &text);
    badge.set_background_color(tab_id, BADGE_COLOR);
}

#[derive(Debug, Clone, Default)]
struct BadgeEntry {
    text: String,
    color: Option<String>,
}

/// In-process badge state. Clones share the same board.
#[derive(Debug, Clone, Default)]
pub struct BadgeBoard {
    entries: Arc<Mutex<HashMap<TabId, BadgeEntry>>>,
}

impl BadgeBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current label for a tab; empty when never set.
    pub fn text(&self, tab_id: TabId) -> String {
        self.entries
            .lock()
            .map(|entries| entries.get(&tab_id).map(|e| e.text.clone()).unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn color(&self, tab_id: TabId) -> Option<String> {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(&tab_id).and_then(|e| e.color.clone()))
    }
}

impl Badge for BadgeBoard {
    fn set_text(&mut self, tab_id: TabId, text: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.entry(tab_id).or_default().text = text.to_string();
        }
    }

    fn set_background_color(&mut self, tab_id: TabId, color: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.entry(tab_id).or_default().color = Some(color.to_string());
        }
    }
}
