//! Net-effect computation: from a transaction log to bus signals.

use super::LogEntry;
use crate::types::{Handle, RecordClass, SignalKey, SignalMethod};
use std::collections::HashMap;

/// One bus emission: a signal name and the ordered handles it carries.
/// Rebuild signals carry no handles.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signal {
    pub key: SignalKey,
    pub handles: Vec<Handle>,
}

impl Signal {
    pub fn new(key: SignalKey, handles: Vec<Handle>) -> Self {
        Self { key, handles }
    }

    pub fn rebuild(class: RecordClass) -> Self {
        Self::new(SignalKey::rebuild(class), Vec::new())
    }
}

/// What happened to one (class, handle) over the whole log.
struct NetEffect<'a> {
    class: RecordClass,
    handle: &'a Handle,
    /// Payload before the first touch.
    old: Option<&'a [u8]>,
    /// Payload after the last touch.
    new: Option<&'a [u8]>,
    first_touch: usize,
    first_add: Option<usize>,
    first_update: Option<usize>,
    first_delete: Option<usize>,
}

/// Collapse a log into the signals it should produce.
///
/// Every handle touched by the log is reduced to its net effect. A net
/// no-op vanishes, a net delete lands only in `<class>-delete`, a net add
/// lands in `<class>-add` (and in `<class>-update` too if the log updated it
/// after adding), and a net update lands in `<class>-update`. A handle
/// appears at most once per signal. Handles within a signal are ordered by
/// the log position of the entry that placed them there, and signals are
/// ordered by their earliest handle.
///
/// With `batch` set, no per-record signals are produced; instead each
/// touched class gets one rebuild signal, in order of first touch.
pub fn compute_signals(entries: &[LogEntry], batch: bool) -> Vec<Signal> {
    if batch {
        let mut classes: Vec<RecordClass> = Vec::new();
        for entry in entries {
            if !classes.contains(&entry.class) {
                classes.push(entry.class);
            }
        }
        return classes.into_iter().map(Signal::rebuild).collect();
    }

    let mut effects: Vec<NetEffect<'_>> = Vec::new();
    let mut positions: HashMap<(RecordClass, &Handle), usize> = HashMap::new();

    for (i, entry) in entries.iter().enumerate() {
        let slot = *positions
            .entry((entry.class, &entry.handle))
            .or_insert_with(|| {
                effects.push(NetEffect {
                    class: entry.class,
                    handle: &entry.handle,
                    old: entry.old.as_deref(),
                    new: None,
                    first_touch: i,
                    first_add: None,
                    first_update: None,
                    first_delete: None,
                });
                effects.len() - 1
            });

        let effect = &mut effects[slot];
        effect.new = entry.new.as_deref();
        let first = match entry.method() {
            Some(SignalMethod::Add) => &mut effect.first_add,
            Some(SignalMethod::Update) => &mut effect.first_update,
            Some(SignalMethod::Delete) => &mut effect.first_delete,
            _ => continue,
        };
        first.get_or_insert(i);
    }

    let mut groups: HashMap<SignalKey, Vec<(usize, Handle)>> = HashMap::new();
    let mut place = |key: SignalKey, position: usize, handle: &Handle| {
        groups.entry(key).or_default().push((position, handle.clone()));
    };

    for effect in &effects {
        match (effect.old, effect.new) {
            (old, new) if old == new => {}
            (None, Some(_)) => {
                let at = effect.first_add.unwrap_or(effect.first_touch);
                place(SignalKey::add(effect.class), at, effect.handle);
                if let Some(at) = effect.first_update {
                    place(SignalKey::update(effect.class), at, effect.handle);
                }
            }
            (Some(_), None) => {
                let at = effect.first_delete.unwrap_or(effect.first_touch);
                place(SignalKey::delete(effect.class), at, effect.handle);
            }
            (Some(_), Some(_)) => {
                let at = effect.first_update.unwrap_or(effect.first_touch);
                place(SignalKey::update(effect.class), at, effect.handle);
            }
            (None, None) => {}
        }
    }

    let mut ordered: Vec<(usize, Signal)> = groups
        .into_iter()
        .map(|(key, mut members)| {
            members.sort_by_key(|(position, _)| *position);
            let start = members[0].0;
            let handles = members.into_iter().map(|(_, handle)| handle).collect();
            (start, Signal::new(key, handles))
        })
        .collect();
    ordered.sort_by_key(|(start, _)| *start);
    ordered.into_iter().map(|(_, signal)| signal).collect()
}
