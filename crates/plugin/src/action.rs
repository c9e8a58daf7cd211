use serde::{Deserialize, Serialize};

/// A named capability of an entry. Action names participate in queries
/// and in rendered schema documentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    List,
    Open,
    Read,
    Stream,
    Exec,
    Delete,
    Signal,
    Metadata,
    Schema,
}

impl Action {
    pub const ALL: [Action; 9] = [
        Action::List,
        Action::Open,
        Action::Read,
        Action::Stream,
        Action::Exec,
        Action::Delete,
        Action::Signal,
        Action::Metadata,
        Action::Schema,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Action::List => "list",
            Action::Open => "open",
            Action::Read => "read",
            Action::Stream => "stream",
            Action::Exec => "exec",
            Action::Delete => "delete",
            Action::Signal => "signal",
            Action::Metadata => "metadata",
            Action::Schema => "schema",
        }
    }

    pub fn from_name(name: &str) -> Option<Action> {
        Action::ALL.iter().copied().find(|a| a.name() == name)
    }

    pub fn is_supported_on(&self, entry: &dyn crate::entry::Entry) -> bool {
        entry.capabilities().contains(*self)
    }

    fn bit(&self) -> u16 {
        1 << (*self as u16)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A set of actions, kept as a bit-set so capability checks stay off
/// the allocator on hot paths.
#[derive(Clone, Copy, Default, Hash, Eq, PartialEq)]
pub struct ActionSet(u16);

impl ActionSet {
    pub fn all() -> ActionSet {
        Action::ALL.iter().copied().collect()
    }

    pub fn contains(&self, action: Action) -> bool {
        self.0 & action.bit() != 0
    }

    pub fn insert(&mut self, action: Action) {
        self.0 |= action.bit();
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Is every action of `self` also in `other`?
    pub fn is_subset(&self, other: ActionSet) -> bool {
        self.0 & !other.0 == 0
    }

    pub fn complement(&self) -> ActionSet {
        ActionSet(Self::all().0 & !self.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = Action> + '_ {
        Action::ALL.iter().copied().filter(|a| self.contains(*a))
    }

    pub fn names(&self) -> Vec<String> {
        self.iter().map(|a| a.name().to_string()).collect()
    }
}

impl std::ops::BitOr for ActionSet {
    type Output = Self;

    fn bitor(self, other: Self) -> Self::Output {
        ActionSet(self.0 | other.0)
    }
}

impl std::ops::BitAnd for ActionSet {
    type Output = Self;

    fn bitand(self, other: Self) -> Self::Output {
        ActionSet(self.0 & other.0)
    }
}

impl std::ops::Sub for ActionSet {
    type Output = Self;

    fn sub(self, other: Self) -> Self::Output {
        ActionSet(self.0 & !other.0)
    }
}

impl From<Action> for ActionSet {
    fn from(action: Action) -> Self {
        ActionSet(action.bit())
    }
}

impl FromIterator<Action> for ActionSet {
    fn from_iter<I: IntoIterator<Item = Action>>(iter: I) -> Self {
        let mut set = ActionSet::default();
        for action in iter {
            set.insert(action);
        }
        set
    }
}

impl std::fmt::Debug for ActionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
