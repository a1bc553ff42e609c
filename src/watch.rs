use std::collections::HashMap;

/// Operation kinds whose output can be watched line by line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Watch {
    Checkout,
    Update,
    Cat,
    Size,
    Log,
    Diff,
    Blame,
    Ls,
}

/// Handle returned by [`Watchers::add`]; only meaningful together with the
/// watch kind it was registered under.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WatchId(usize);

type Callback = Box<dyn Fn(&str) + Send + Sync>;

/// Callbacks registered per watch kind.
///
/// Removing a callback leaves its slot empty so the ids of the others stay valid.
#[derive(Default)]
pub struct Watchers {
    slots: HashMap<Watch, Vec<Option<Callback>>>,
}

impl Watchers {
    pub fn add(&mut self, watch: Watch, callback: impl Fn(&str) + Send + Sync + 'static) -> WatchId {
        let slots = self.slots.entry(watch).or_default();
        slots.push(Some(Box::new(callback)));
        WatchId(slots.len() - 1)
    }

    pub fn remove(&mut self, watch: Watch, id: WatchId) {
        if let Some(slot) = self.slots.get_mut(&watch).and_then(|slots| slots.get_mut(id.0)) {
            *slot = None;
        }
    }

    pub fn is_watched(&self, watch: Watch) -> bool {
        self.slots
            .get(&watch)
            .is_some_and(|slots| slots.iter().any(Option::is_some))
    }

    pub fn notify(&self, watch: Watch, line: &str) {
        let Some(slots) = self.slots.get(&watch) else {
            return;
        };
        for callback in slots.iter().flatten() {
            callback(line);
        }
    }
}

impl std::fmt::Debug for Watchers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut counts: Vec<_> = self
            .slots
            .iter()
            .map(|(watch, slots)| (*watch, slots.iter().filter(|s| s.is_some()).count()))
            .collect();
        counts.sort_by_key(|(watch, _)| *watch as u8);
        f.debug_map().entries(counts).finish()
    }
}
