//! Child window geometry.

use serde::{Deserialize, Serialize};

/// Placement of a window opened with `open()`. Unset fields fall back to the
/// defaults below.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChildWindowOptions {
    /// Browsing context name, `_blank` when unset.
    pub target: Option<String>,
    pub left: Option<i32>,
    pub top: Option<i32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl ChildWindowOptions {
    pub const DEFAULT_TARGET: &'static str = "_blank";
    pub const DEFAULT_WIDTH: u32 = 800;
    pub const DEFAULT_HEIGHT: u32 = 600;

    /// Browsing context name to open into.
    pub fn target(&self) -> &str {
        self.target.as_deref().unwrap_or(Self::DEFAULT_TARGET)
    }

    /// Render the window feature string, e.g. `left=0,top=0,width=800,height=600,popup`.
    pub fn features(&self) -> String {
        format!(
            "left={},top={},width={},height={},popup",
            self.left.unwrap_or(0),
            self.top.unwrap_or(0),
            self.width.unwrap_or(Self::DEFAULT_WIDTH),
            self.height.unwrap_or(Self::DEFAULT_HEIGHT),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_features() {
        let options = ChildWindowOptions::default();
        assert_eq!(options.target(), "_blank");
        assert_eq!(options.features(), "left=0,top=0,width=800,height=600,popup");
    }

    #[test]
    fn test_custom_geometry() {
        let options = ChildWindowOptions {
            target: Some("child".to_string()),
            left: Some(100),
            width: Some(320),
            ..Default::default()
        };
        assert_eq!(options.target(), "child");
        assert_eq!(options.features(), "left=100,top=0,width=320,height=600,popup");
    }
}
