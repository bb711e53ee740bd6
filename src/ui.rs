use tracing::info;

use crate::types::{ButtonStyle, StatusColor};

/// Widget operations a screen controller needs from the host UI
///
/// A surface belongs to exactly one screen and is only touched from that
/// screen's event loop.
pub trait WidgetSurface: Send {
    /// Replace the status line
    fn show_status(&mut self, text: &str, color: StatusColor);

    /// Restyle the action button
    fn set_button(&mut self, label: &str, style: ButtonStyle);

    /// Release widgets when the screen closes
    fn teardown(&mut self) {}
}

/// Surface that renders through `tracing`, for headless hosts
#[derive(Debug, Clone, Default)]
pub struct LogSurface {
    screen: String,
    status: Option<(String, StatusColor)>,
    button: Option<(String, ButtonStyle)>,
}

impl LogSurface {
    /// Create a surface for the named screen
    #[must_use]
    pub fn new(screen: impl Into<String>) -> Self {
        Self {
            screen: screen.into(),
            ..Self::default()
        }
    }

    /// Last rendered status line
    #[must_use]
    pub fn status(&self) -> Option<(&str, StatusColor)> {
        self.status.as_ref().map(|(text, color)| (text.as_str(), *color))
    }

    /// Last rendered button
    #[must_use]
    pub fn button(&self) -> Option<(&str, ButtonStyle)> {
        self.button.as_ref().map(|(label, style)| (label.as_str(), *style))
    }
}

impl WidgetSurface for LogSurface {
    fn show_status(&mut self, text: &str, color: StatusColor) {
        info!(screen = %self.screen, %color, "{}", text);
        self.status = Some((text.to_string(), color));
    }

    fn set_button(&mut self, label: &str, style: ButtonStyle) {
        self.button = Some((label.to_string(), style));
    }

    fn teardown(&mut self) {
        info!(screen = %self.screen, "Screen closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_surface_keeps_last_render() {
        let mut surface = LogSurface::new("secret");
        assert!(surface.status().is_none());

        surface.show_status("Loading...", StatusColor::Pending);
        surface.show_status("Token: abc", StatusColor::Success);
        surface.set_button("Get Secret", ButtonStyle::Default);

        assert_eq!(surface.status(), Some(("Token: abc", StatusColor::Success)));
        assert_eq!(surface.button(), Some(("Get Secret", ButtonStyle::Default)));
    }
}
