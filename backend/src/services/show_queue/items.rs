//! Show queue items and the state derived from them

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::library::{EpisodeStatus, ShowKey};
use crate::services::queue::{PRIORITY_HIGH, PRIORITY_NORMAL, PRIORITY_REMOVE, QueueJob};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Add,
    Refresh,
    Update,
    SeasonUpdate,
    Rename,
    Subtitle,
    Remove,
}

impl ActionKind {
    /// Kinds in the same class exclude each other per show
    pub fn exclusion_class(&self) -> ActionKind {
        match self {
            ActionKind::SeasonUpdate => ActionKind::Update,
            other => *other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Add => "Add",
            ActionKind::Refresh => "Refresh",
            ActionKind::Update => "Update",
            ActionKind::SeasonUpdate => "Season Update",
            ActionKind::Rename => "Rename",
            ActionKind::Subtitle => "Subtitle",
            ActionKind::Remove => "Remove",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller supplied settings for a new show; unset fields use the defaults
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AddShowOptions {
    /// Exact show folder; derived from the root dir and show name when unset
    pub show_dir: Option<PathBuf>,
    pub root_dir: Option<PathBuf>,
    pub language: Option<String>,
    pub default_status: Option<EpisodeStatus>,
    pub quality: Option<String>,
    pub anime: bool,
    pub scene: bool,
    pub subtitles: bool,
    pub paused: bool,
    pub season_folders: Option<bool>,
}

/// One show operation
#[derive(Debug, Clone, PartialEq)]
pub enum ShowQueueItem {
    Add {
        show: ShowKey,
        options: AddShowOptions,
    },
    Refresh {
        show: ShowKey,
        force: bool,
    },
    Update {
        show: ShowKey,
    },
    SeasonUpdate {
        show: ShowKey,
        seasons: Vec<i32>,
    },
    Rename {
        show: ShowKey,
    },
    Subtitle {
        show: ShowKey,
    },
    Remove {
        show: ShowKey,
        full: bool,
    },
}

impl ShowQueueItem {
    pub fn kind(&self) -> ActionKind {
        match self {
            ShowQueueItem::Add { .. } => ActionKind::Add,
            ShowQueueItem::Refresh { .. } => ActionKind::Refresh,
            ShowQueueItem::Update { .. } => ActionKind::Update,
            ShowQueueItem::SeasonUpdate { .. } => ActionKind::SeasonUpdate,
            ShowQueueItem::Rename { .. } => ActionKind::Rename,
            ShowQueueItem::Subtitle { .. } => ActionKind::Subtitle,
            ShowQueueItem::Remove { .. } => ActionKind::Remove,
        }
    }

    pub fn show(&self) -> ShowKey {
        match self {
            ShowQueueItem::Add { show, .. }
            | ShowQueueItem::Refresh { show, .. }
            | ShowQueueItem::Update { show }
            | ShowQueueItem::SeasonUpdate { show, .. }
            | ShowQueueItem::Rename { show }
            | ShowQueueItem::Subtitle { show }
            | ShowQueueItem::Remove { show, .. } => *show,
        }
    }

    /// Whether this item concerns `show` and belongs to `kind`'s class
    pub fn matches(&self, show: &ShowKey, kind: ActionKind) -> bool {
        self.show() == *show && self.kind().exclusion_class() == kind.exclusion_class()
    }
}

impl QueueJob for ShowQueueItem {
    fn priority(&self) -> i32 {
        match self.kind() {
            ActionKind::Remove => PRIORITY_REMOVE,
            ActionKind::Add
            | ActionKind::Update
            | ActionKind::SeasonUpdate
            | ActionKind::Refresh => PRIORITY_HIGH,
            ActionKind::Rename | ActionKind::Subtitle => PRIORITY_NORMAL,
        }
    }

    fn name(&self) -> String {
        match self {
            ShowQueueItem::SeasonUpdate { show, seasons } => {
                format!("{} {} {:?}", self.kind(), show, seasons)
            }
            _ => format!("{} {}", self.kind(), self.show()),
        }
    }

    fn is_equivalent(&self, other: &Self) -> bool {
        other.matches(&self.show(), self.kind())
    }

    fn exclusive_while_running(&self) -> bool {
        !matches!(self, ShowQueueItem::Refresh { force: true, .. })
    }
}

/// Where a show stands, derived from the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShowState {
    Idle,
    AddPending,
    Adding,
    UpdatePending,
    Updating,
    RefreshPending,
    Refreshing,
    RenamePending,
    Renaming,
    SubtitlePending,
    DownloadingSubtitles,
    RemovePending,
    Removing,
}

fn pending_state(kind: ActionKind) -> ShowState {
    match kind.exclusion_class() {
        ActionKind::Add => ShowState::AddPending,
        ActionKind::Refresh => ShowState::RefreshPending,
        ActionKind::Rename => ShowState::RenamePending,
        ActionKind::Subtitle => ShowState::SubtitlePending,
        ActionKind::Remove => ShowState::RemovePending,
        _ => ShowState::UpdatePending,
    }
}

fn running_state(kind: ActionKind) -> ShowState {
    match kind.exclusion_class() {
        ActionKind::Add => ShowState::Adding,
        ActionKind::Refresh => ShowState::Refreshing,
        ActionKind::Rename => ShowState::Renaming,
        ActionKind::Subtitle => ShowState::DownloadingSubtitles,
        ActionKind::Remove => ShowState::Removing,
        _ => ShowState::Updating,
    }
}

/// What the queue holds for one show
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShowActivity {
    pub running: Option<ActionKind>,
    /// Queued kinds in execution order
    pub queued: Vec<ActionKind>,
}

impl ShowActivity {
    pub fn is_running(&self, kind: ActionKind) -> bool {
        self.running
            .is_some_and(|k| k.exclusion_class() == kind.exclusion_class())
    }

    pub fn is_queued(&self, kind: ActionKind) -> bool {
        self.queued
            .iter()
            .any(|k| k.exclusion_class() == kind.exclusion_class())
    }

    pub fn is_idle(&self) -> bool {
        self.running.is_none() && self.queued.is_empty()
    }

    /// A queued removal outranks whatever runs, since it will end the show
    pub fn state(&self) -> ShowState {
        if self.is_running(ActionKind::Remove) {
            return ShowState::Removing;
        }
        if self.is_queued(ActionKind::Remove) {
            return ShowState::RemovePending;
        }
        if let Some(kind) = self.running {
            return running_state(kind);
        }
        self.queued
            .first()
            .map(|kind| pending_state(*kind))
            .unwrap_or(ShowState::Idle)
    }
}

/// Collect the activity for `show` from queued items (execution order) and
/// the running item
pub fn show_activity<'a, I>(queued: I, current: Option<&ShowQueueItem>, show: &ShowKey) -> ShowActivity
where
    I: IntoIterator<Item = &'a ShowQueueItem>,
{
    ShowActivity {
        running: current.filter(|item| item.show() == *show).map(|item| item.kind()),
        queued: queued
            .into_iter()
            .filter(|item| item.show() == *show)
            .map(|item| item.kind())
            .collect(),
    }
}
