// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Registry of known vibes (theme-level design token sets).
//!
//! The session actor only needs to know which ids exist; the tokens ride
//! along so clients can list and preview them.

use serde::Serialize;

/// Vibe used when `init` does not name one.
pub const DEFAULT_VIBE_ID: &str = "minimalist";

/// Spacing density of a vibe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpacingScale {
    /// Compact.
    Tight,
    /// Default.
    Normal,
    /// Generous.
    Airy,
}

/// Color palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Colors {
    /// Primary brand color.
    pub primary: &'static str,
    /// Secondary color.
    pub secondary: &'static str,
    /// Page background.
    pub background: &'static str,
    /// Card/surface background.
    pub surface: &'static str,
    /// Body text.
    pub text: &'static str,
    /// De-emphasized text.
    pub text_muted: &'static str,
    /// Accent color.
    pub accent: &'static str,
    /// Border color.
    pub border: &'static str,
}

/// Spacing tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Spacing {
    /// Density.
    pub scale: SpacingScale,
    /// Base unit in px.
    pub base: u32,
}

/// Typography tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Typography {
    /// Sans-serif stack.
    pub font_sans: &'static str,
    /// Serif stack.
    pub font_serif: &'static str,
    /// Monospace stack.
    pub font_mono: &'static str,
    /// Heading weight.
    pub heading_weight: &'static str,
    /// Body weight.
    pub body_weight: &'static str,
}

/// Border radius tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Radius {
    /// Small.
    pub sm: &'static str,
    /// Medium.
    pub md: &'static str,
    /// Large.
    pub lg: &'static str,
    /// Pill.
    pub full: &'static str,
}

/// A complete vibe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VibeTokens {
    /// Registry key.
    pub id: &'static str,
    /// Display name.
    pub name: &'static str,
    /// One-line description.
    pub description: &'static str,
    /// Palette.
    pub colors: Colors,
    /// Spacing.
    pub spacing: Spacing,
    /// Typography.
    pub typography: Typography,
    /// Border radius.
    pub border_radius: Radius,
}

static VIBES: [VibeTokens; 2] = [
    VibeTokens {
        id: "minimalist",
        name: "Minimalist",
        description: "Clean, focused design with tight spacing and neutral colors",
        colors: Colors {
            primary: "#0f172a",
            secondary: "#64748b",
            background: "#ffffff",
            surface: "#f8fafc",
            text: "#0f172a",
            text_muted: "#64748b",
            accent: "#6366f1",
            border: "#e2e8f0",
        },
        spacing: Spacing {
            scale: SpacingScale::Tight,
            base: 4,
        },
        typography: Typography {
            font_sans: "Inter, system-ui, sans-serif",
            font_serif: "Georgia, serif",
            font_mono: "Fira Code, monospace",
            heading_weight: "600",
            body_weight: "400",
        },
        border_radius: Radius {
            sm: "0.25rem",
            md: "0.375rem",
            lg: "0.5rem",
            full: "9999px",
        },
    },
    VibeTokens {
        id: "high-fashion",
        name: "High Fashion",
        description: "Luxurious, bold design with high contrast and elegant typography",
        colors: Colors {
            primary: "#000000",
            secondary: "#d4af37",
            background: "#0a0a0a",
            surface: "#1a1a1a",
            text: "#ffffff",
            text_muted: "#a3a3a3",
            accent: "#d4af37",
            border: "#262626",
        },
        spacing: Spacing {
            scale: SpacingScale::Airy,
            base: 8,
        },
        typography: Typography {
            font_sans: "Helvetica Neue, Arial, sans-serif",
            font_serif: "Playfair Display, Georgia, serif",
            font_mono: "SF Mono, monospace",
            heading_weight: "300",
            body_weight: "300",
        },
        border_radius: Radius {
            sm: "0",
            md: "0",
            lg: "0",
            full: "9999px",
        },
    },
];

/// Look up a vibe by id.
pub fn get_vibe(id: &str) -> Option<&'static VibeTokens> {
    VIBES.iter().find(|v| v.id == id)
}

/// Whether `id` names a registered vibe.
pub fn is_known_vibe(id: &str) -> bool {
    get_vibe(id).is_some()
}

/// Every registered vibe.
pub fn all_vibes() -> &'static [VibeTokens] {
    &VIBES
}
