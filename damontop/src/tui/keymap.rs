//! Key bindings per page

use std::collections::HashMap;

use crossterm::event::KeyCode;

use crate::analysis::SortKey;
use crate::session::Command;
use crate::snapshot::View;

/// Page family a binding applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageKind {
    Home,
    Monitor,
    Maplist,
}

impl PageKind {
    #[must_use]
    pub fn of(view: &View) -> Self {
        match view {
            View::Home { .. } => PageKind::Home,
            View::Monitor { .. } => PageKind::Monitor,
            View::Maplist { .. } => PageKind::Maplist,
        }
    }
}

/// What a key press does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Forwarded to the session as is
    Session(Command),
    /// Open the process on the selected row
    OpenSelected,
    ScrollUp,
    ScrollDown,
    Help,
}

pub struct Keymap {
    bindings: HashMap<(PageKind, KeyCode), Action>,
}

impl Default for Keymap {
    fn default() -> Self {
        use PageKind::{Home, Maplist, Monitor};

        let mut bindings = HashMap::new();
        for page in [Home, Monitor, Maplist] {
            for (key, action) in [
                (KeyCode::Char('q'), Action::Session(Command::Quit)),
                (KeyCode::Char('r'), Action::Session(Command::Refresh)),
                (KeyCode::Char('?'), Action::Help),
                (KeyCode::Up, Action::ScrollUp),
                (KeyCode::Down, Action::ScrollDown),
            ] {
                bindings.insert((page, key), action);
            }
        }

        for page in [Monitor, Maplist] {
            bindings.insert((page, KeyCode::Char('h')), Action::Session(Command::Home));
            bindings.insert((page, KeyCode::Char('b')), Action::Session(Command::Back));
        }
        bindings.insert((Home, KeyCode::Enter), Action::OpenSelected);
        bindings.insert((Monitor, KeyCode::Char('l')), Action::Session(Command::Maplist));

        for page in [Home, Monitor] {
            bindings.insert((page, KeyCode::Char('p')), Action::Session(Command::TogglePause));
            for digit in ['1', '2', '3', '4', '5'] {
                if let Some(key) = SortKey::from_digit(digit) {
                    bindings.insert((page, KeyCode::Char(digit)), Action::Session(Command::Sort(key)));
                }
            }
        }

        Self { bindings }
    }
}

impl Keymap {
    /// Binding for `key` on `page`; letters match either case
    #[must_use]
    pub fn lookup(&self, page: PageKind, key: KeyCode) -> Option<Action> {
        let key = match key {
            KeyCode::Char(c) => KeyCode::Char(c.to_ascii_lowercase()),
            other => other,
        };
        self.bindings.get(&(page, key)).copied()
    }
}
