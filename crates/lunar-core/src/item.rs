//! Result items and the values attached to them.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ExtensionResult;

/// A query result.
///
/// Every accessor is computed on demand. Items are shared between result
/// lists, so implementations must not assume exclusive ownership.
pub trait Item: Send + Sync {
    /// Identifier, unique within the producing extension.
    fn id(&self) -> ExtensionResult<String>;

    /// Primary display text.
    fn text(&self) -> ExtensionResult<String>;

    /// Secondary display text.
    fn subtext(&self) -> ExtensionResult<String>;

    /// Text placed in the input line when the user completes this item.
    fn input_action_text(&self) -> ExtensionResult<String>;

    /// Icon descriptor, if any.
    fn icon(&self) -> ExtensionResult<Option<Icon>>;

    /// Actions the user can activate on this item.
    fn actions(&self) -> ExtensionResult<Vec<Action>>;
}

/// Descriptor of an icon. Rendering is up to the host UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "source", rename_all = "snake_case")]
pub enum Icon {
    /// An image file.
    Image(PathBuf),
    /// The icon associated with a file's type.
    FileType(PathBuf),
    /// A named icon from the desktop theme.
    Theme(String),
    /// A rendered grapheme (e.g. an emoji).
    Grapheme(String),
}

impl Icon {
    /// Url-like representation of the descriptor.
    pub fn to_url(&self) -> String {
        match self {
            Self::Image(path) => format!("file:{}", path.display()),
            Self::FileType(path) => format!("qfip:{}", path.display()),
            Self::Theme(name) => format!("xdg:{name}"),
            Self::Grapheme(text) => format!("gen:?text={text}"),
        }
    }
}

impl fmt::Display for Icon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_url())
    }
}

/// An activatable action of an item.
#[derive(Clone)]
pub struct Action {
    /// Identifier, unique within the item.
    pub id: String,

    /// Display text.
    pub text: String,

    callback: Arc<dyn Fn() + Send + Sync>,
}

impl Action {
    /// Create an action from a zero-argument callback.
    pub fn new(
        id: impl Into<String>,
        text: impl Into<String>,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            callback: Arc::new(callback),
        }
    }

    /// Run the action's callback.
    pub fn activate(&self) {
        (self.callback)()
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("id", &self.id)
            .field("text", &self.text)
            .finish_non_exhaustive()
    }
}

/// A plain item holding its values.
#[derive(Debug, Clone, Default)]
pub struct StandardItem {
    pub id: String,
    pub text: String,
    pub subtext: String,
    pub input_action_text: String,
    pub icon: Option<Icon>,
    pub actions: Vec<Action>,
}

impl StandardItem {
    /// Create an item with an id and a text.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            ..Default::default()
        }
    }

    /// Set the subtext.
    pub fn with_subtext(mut self, subtext: impl Into<String>) -> Self {
        self.subtext = subtext.into();
        self
    }

    /// Set the input action text.
    pub fn with_input_action_text(mut self, text: impl Into<String>) -> Self {
        self.input_action_text = text.into();
        self
    }

    /// Set the icon.
    pub fn with_icon(mut self, icon: Icon) -> Self {
        self.icon = Some(icon);
        self
    }

    /// Set the actions.
    pub fn with_actions(mut self, actions: Vec<Action>) -> Self {
        self.actions = actions;
        self
    }
}

impl Item for StandardItem {
    fn id(&self) -> ExtensionResult<String> {
        Ok(self.id.clone())
    }

    fn text(&self) -> ExtensionResult<String> {
        Ok(self.text.clone())
    }

    fn subtext(&self) -> ExtensionResult<String> {
        Ok(self.subtext.clone())
    }

    fn input_action_text(&self) -> ExtensionResult<String> {
        Ok(self.input_action_text.clone())
    }

    fn icon(&self) -> ExtensionResult<Option<Icon>> {
        Ok(self.icon.clone())
    }

    fn actions(&self) -> ExtensionResult<Vec<Action>> {
        Ok(self.actions.clone())
    }
}

/// An item paired with a relevance score.
#[derive(Clone)]
pub struct RankItem {
    pub item: Arc<dyn Item>,
    pub score: f64,
}

impl RankItem {
    pub fn new(item: Arc<dyn Item>, score: f64) -> Self {
        Self { item, score }
    }
}

/// An item paired with the string it is indexed by.
#[derive(Clone)]
pub struct IndexItem {
    pub item: Arc<dyn Item>,
    pub string: String,
}

impl IndexItem {
    pub fn new(item: Arc<dyn Item>, string: impl Into<String>) -> Self {
        Self {
            item,
            string: string.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_action_activate_runs_callback() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let action = Action::new("copy", "Copy", move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        action.activate();
        action.clone().activate();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_standard_item_accessors() {
        let item = StandardItem::new("id", "text")
            .with_subtext("sub")
            .with_icon(Icon::Theme("firefox".into()));

        assert_eq!(item.id().unwrap(), "id");
        assert_eq!(item.subtext().unwrap(), "sub");
        assert_eq!(item.input_action_text().unwrap(), "");
        assert_eq!(item.icon().unwrap().unwrap().to_url(), "xdg:firefox");
        assert!(item.actions().unwrap().is_empty());
    }
}
