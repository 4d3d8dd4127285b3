//! Style catalog: product categories, their visual styles, and the prompt
//! templates each style renders into image and video prompts.

use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::analysis::ProductAnalysis;
use crate::error::ReelError;

pub const GENERIC_CATEGORY: &str = "generic";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Style {
    pub id: String,
    pub category: String,
    pub name: String,
    /// Template for the still image, `{product}` and `{description}` are substituted
    pub image_prompt: String,
    /// Shot templates for video clips, used in order and cycled
    pub video_prompts: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct StyleCatalog {
    categories: Vec<Category>,
    styles: Vec<Style>,
}

fn category(id: &str, name: &str, keywords: &[&str]) -> Category {
    Category {
        id: id.to_string(),
        name: name.to_string(),
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
    }
}

fn style(id: &str, category: &str, name: &str, image_prompt: &str, video_prompts: &[&str]) -> Style {
    Style {
        id: id.to_string(),
        category: category.to_string(),
        name: name.to_string(),
        image_prompt: image_prompt.to_string(),
        video_prompts: video_prompts.iter().map(|p| p.to_string()).collect(),
    }
}

impl StyleCatalog {
    pub fn builtin() -> Self {
        let categories = vec![
            category("cosmetics", "Beauty & Cosmetics", &["beauty", "skincare", "makeup", "serum", "cream", "perfume", "fragrance"]),
            category("food", "Food & Beverage", &["beverage", "drink", "snack", "coffee", "tea", "wine", "sauce"]),
            category("fashion", "Fashion & Apparel", &["apparel", "clothing", "shoes", "sneaker", "bag", "handbag", "accessory"]),
            category("electronics", "Electronics & Gadgets", &["gadget", "tech", "headphones", "earbuds", "phone", "speaker", "camera"]),
            category("home", "Home & Living", &["furniture", "decor", "kitchen", "mug", "candle", "lamp", "ceramic"]),
            category("jewelry", "Jewelry & Watches", &["ring", "necklace", "bracelet", "earring", "watch", "gold", "silver"]),
            category(GENERIC_CATEGORY, "Everything Else", &[]),
        ];

        let styles = vec![
            style(
                "cosmetics_spa",
                "cosmetics",
                "Spa Serenity",
                "Professional beauty advertisement of {product} on a wet marble slab with soft morning light, eucalyptus leaves and water droplets, pastel palette, shallow depth of field. {description}",
                &[
                    "Slow dolly in on {product} as water droplets glisten in soft light",
                    "Gentle orbit around {product} with eucalyptus leaves swaying",
                    "Macro pan across the texture of {product}, ending on the label",
                ],
            ),
            style(
                "cosmetics_glam",
                "cosmetics",
                "Evening Glam",
                "Luxury cosmetics shot of {product} on black glass with gold reflections and rim lighting, glamorous high-contrast mood. {description}",
                &[
                    "Slow push in on {product} while golden light sweeps across the glass",
                    "Reflection reveal of {product} with sparkling bokeh",
                ],
            ),
            style(
                "food_fresh",
                "food",
                "Fresh & Bright",
                "Appetizing commercial food photo of {product} on a rustic wooden table with fresh ingredients, natural window light, vibrant colors. {description}",
                &[
                    "Overhead slow push toward {product} as ingredients fall into frame",
                    "Side tracking shot of {product} with steam and fresh garnish",
                    "Close-up of {product} with a splash in slow motion",
                ],
            ),
            style(
                "fashion_editorial",
                "fashion",
                "Editorial",
                "High-fashion editorial photo of {product} against a minimal concrete backdrop with hard directional sunlight and crisp shadows. {description}",
                &[
                    "Low angle slow tilt up over {product} with fabric moving in the breeze",
                    "Handheld orbit around {product} in dramatic sunlight",
                ],
            ),
            style(
                "electronics_neon",
                "electronics",
                "Neon Tech",
                "Futuristic tech product render of {product} floating above a dark reflective surface with cyan and magenta neon edge lighting. {description}",
                &[
                    "Slow 360 degree rotation of {product} with neon light trails",
                    "Dramatic push in on {product} as a light scan passes over it",
                    "Exploded-view style float of {product} settling into place",
                ],
            ),
            style(
                "home_cozy",
                "home",
                "Cozy Living",
                "Warm lifestyle photo of {product} in a sunlit Scandinavian living room with linen textures and plants, inviting and calm. {description}",
                &[
                    "Slow dolly past {product} as afternoon light shifts through the window",
                    "Gentle rack focus from a plant to {product}",
                ],
            ),
            style(
                "jewelry_luxe",
                "jewelry",
                "Velvet Luxe",
                "Luxury jewelry advertisement of {product} on deep velvet with sparkling point lights and elegant reflections, macro detail. {description}",
                &[
                    "Macro orbit around {product} with glittering highlights",
                    "Slow push in on {product} as light catches every facet",
                ],
            ),
            style(
                "generic_studio",
                GENERIC_CATEGORY,
                "Clean Studio",
                "Professional studio product photo of {product} on a seamless white background with soft shadows, commercial e-commerce quality, vertical composition. {description}",
                &[
                    "Slow 360 degree turntable rotation of {product} in a bright studio",
                    "Smooth push in on {product} ending on its key detail",
                    "Gentle pan across {product} with soft light sweeping over it",
                ],
            ),
        ];

        StyleCatalog { categories, styles }
    }

    /// Overlay stored styles: a matching id replaces the built-in, a new id is appended.
    pub fn with_overrides(mut self, overrides: Vec<Style>) -> Self {
        for style in overrides {
            if !self.categories.iter().any(|c| c.id == style.category) {
                self.categories.push(Category {
                    id: style.category.clone(),
                    name: style.category.clone(),
                    keywords: Vec::new(),
                });
            }
            match self.styles.iter_mut().find(|s| s.id == style.id) {
                Some(existing) => *existing = style,
                None => self.styles.push(style),
            }
        }
        self
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn styles(&self) -> &[Style] {
        &self.styles
    }

    pub fn styles_for(&self, category_id: &str) -> Vec<&Style> {
        self.styles
            .iter()
            .filter(|s| s.category.eq_ignore_ascii_case(category_id))
            .collect()
    }

    pub fn get(&self, style_id: &str) -> Option<&Style> {
        self.styles.iter().find(|s| s.id.eq_ignore_ascii_case(style_id))
    }

    /// Match a free-form hint against category ids, names and keywords.
    pub fn match_category(&self, hint: &str) -> Option<&Category> {
        let hint = hint.trim().to_lowercase();
        if hint.is_empty() {
            return None;
        }

        self.categories
            .iter()
            .find(|c| c.id == hint || c.name.to_lowercase() == hint)
            .or_else(|| {
                let words = hint_words(&hint);
                self.categories.iter().find(|c| {
                    c.keywords
                        .iter()
                        .chain(std::iter::once(&c.id))
                        .any(|k| words.iter().any(|w| word_matches(w, k)))
                })
            })
    }

    /// Requested style wins, then the analysis' style and category suggestions,
    /// then the generic category.
    pub fn derive_style(&self, analysis: &ProductAnalysis, requested: Option<&str>) -> Result<&Style> {
        if let Some(requested) = requested.map(str::trim).filter(|r| !r.is_empty()) {
            return self
                .get(requested)
                .ok_or_else(|| ReelError::invalid(format!("unknown style '{}'", requested)).into());
        }

        if let Some(suggested) = analysis.style.as_deref() {
            if let Some(style) = self.get(suggested).or_else(|| {
                self.styles
                    .iter()
                    .find(|s| s.name.eq_ignore_ascii_case(suggested.trim()))
            }) {
                return Ok(style);
            }
        }

        let category = analysis
            .category
            .as_deref()
            .and_then(|hint| self.match_category(hint))
            .map(|c| c.id.as_str())
            .unwrap_or(GENERIC_CATEGORY);

        self.styles_for(category)
            .into_iter()
            .next()
            .or_else(|| self.styles_for(GENERIC_CATEGORY).into_iter().next())
            .or_else(|| self.styles.first())
            .ok_or_else(|| ReelError::NotFound("style catalog is empty".to_string()).into())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptSet {
    pub style_id: String,
    pub image_prompt: String,
    pub video_prompts: Vec<String>,
}

impl PromptSet {
    pub fn derive(style: &Style, product_name: &str, analysis: &ProductAnalysis, video_count: usize) -> Self {
        let image_prompt = render_template(&style.image_prompt, product_name, &analysis.description);

        let video_prompts = if style.video_prompts.is_empty() {
            vec![format!("Slow cinematic push in on {}", product_name); video_count]
        } else {
            style
                .video_prompts
                .iter()
                .cycle()
                .take(video_count)
                .map(|t| render_template(t, product_name, &analysis.description))
                .collect()
        };

        PromptSet {
            style_id: style.id.clone(),
            image_prompt,
            video_prompts,
        }
    }
}

fn hint_words(hint: &str) -> Vec<&str> {
    static WORD: OnceLock<Regex> = OnceLock::new();
    let word = WORD.get_or_init(|| Regex::new(r"\w+").expect("static regex"));
    word.find_iter(hint).map(|m| m.as_str()).collect()
}

// Whole words only, allowing a plural suffix ("rings", "glasses").
fn word_matches(word: &str, keyword: &str) -> bool {
    match word.strip_prefix(keyword) {
        Some(rest) => rest.is_empty() || rest == "s" || rest == "es",
        None => false,
    }
}

/// Substitute `{product}` and `{description}`; unknown placeholders are left as-is.
pub fn render_template(template: &str, product_name: &str, description: &str) -> String {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    let placeholder = PLACEHOLDER.get_or_init(|| Regex::new(r"\{(\w+)\}").expect("static regex"));

    let rendered = placeholder.replace_all(template, |caps: &regex::Captures| match &caps[1] {
        "product" => product_name.trim().to_string(),
        "description" => description.trim().to_string(),
        _ => caps[0].to_string(),
    });
    rendered.trim().to_string()
}
