//! Composite score weighting

use serde::{Deserialize, Serialize};

/// Health categories combined into the composite score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Node,
    Pod,
    ControlPlane,
    Network,
    ResourceUsage,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Node,
        Category::Pod,
        Category::ControlPlane,
        Category::Network,
        Category::ResourceUsage,
    ];

    pub fn weight(&self) -> f64 {
        match self {
            Category::Node => 0.30,
            Category::Pod => 0.25,
            Category::ControlPlane => 0.25,
            Category::Network => 0.10,
            Category::ResourceUsage => 0.10,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Node => "node",
            Category::Pod => "pod",
            Category::ControlPlane => "control_plane",
            Category::Network => "network",
            Category::ResourceUsage => "resource_usage",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sub-scores (0-100) per category; `None` marks a category that could not be evaluated
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CategoryScores {
    pub node: f64,
    pub pod: f64,
    pub control_plane: Option<f64>,
    pub network: Option<f64>,
    pub resource_usage: Option<f64>,
}

impl CategoryScores {
    pub fn get(&self, category: Category) -> Option<f64> {
        match category {
            Category::Node => Some(self.node),
            Category::Pod => Some(self.pod),
            Category::ControlPlane => self.control_plane,
            Category::Network => self.network,
            Category::ResourceUsage => self.resource_usage,
        }
    }

    pub fn unknown(&self) -> Vec<Category> {
        Category::ALL
            .into_iter()
            .filter(|c| self.get(*c).is_none())
            .collect()
    }

    /// Weighted composite, renormalized over the known categories
    pub fn composite(&self) -> u8 {
        weighted_score(Category::ALL.map(|c| (c.weight(), self.get(c))))
    }
}

/// Round `Σ w·s / Σ w` over the known scores and clamp to [0, 100]
///
/// With no known score at all the result is 100: nothing observed is wrong.
pub fn weighted_score(parts: impl IntoIterator<Item = (f64, Option<f64>)>) -> u8 {
    let (sum, weight) = parts
        .into_iter()
        .filter_map(|(w, s)| s.map(|s| (w, s)))
        .fold((0.0, 0.0), |(sum, weight), (w, s)| (sum + w * s, weight + w));

    if weight <= 0.0 {
        return 100;
    }

    (sum / weight).round().clamp(0.0, 100.0) as u8
}
