use image::Rgb;
use serde::{Deserialize, Serialize};

/// Report category a raw model label is normalized to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Pothole,
    Plastic,
    #[serde(rename = "otherlitter")]
    OtherLitter,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Pothole, Category::Plastic, Category::OtherLitter];

    /// Map a raw class label. Case-insensitive and total: anything unmapped is
    /// `OtherLitter`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "pothole" => Category::Pothole,
            "plastic" => Category::Plastic,
            "litter" | "otherlitter" | "trash" => Category::OtherLitter,
            _ => Category::OtherLitter,
        }
    }

    /// Key used in JSON reports and overlay labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Pothole => "pothole",
            Category::Plastic => "plastic",
            Category::OtherLitter => "otherlitter",
        }
    }

    pub fn color(self) -> Rgb<u8> {
        match self {
            Category::Pothole => Rgb([0, 0, 255]),
            Category::Plastic => Rgb([255, 0, 0]),
            Category::OtherLitter => Rgb([0, 255, 0]),
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-category integer counts, one field per category.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCounts {
    pub pothole: u64,
    pub plastic: u64,
    pub otherlitter: u64,
}

impl CategoryCounts {
    pub fn get(&self, category: Category) -> u64 {
        match category {
            Category::Pothole => self.pothole,
            Category::Plastic => self.plastic,
            Category::OtherLitter => self.otherlitter,
        }
    }

    pub fn increment(&mut self, category: Category) {
        match category {
            Category::Pothole => self.pothole += 1,
            Category::Plastic => self.plastic += 1,
            Category::OtherLitter => self.otherlitter += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.pothole + self.plastic + self.otherlitter
    }
}

impl std::ops::AddAssign for CategoryCounts {
    fn add_assign(&mut self, other: Self) {
        self.pothole += other.pothole;
        self.plastic += other.plastic;
        self.otherlitter += other.otherlitter;
    }
}
