//! Weighted A/B variant assignment.
//!
//! Assignment is stateless: the same visitor may land on different variants
//! on different requests, there is no stickiness.

use rand::Rng;
use uuid::Uuid;

use crate::models::{AbTest, AbTestStatus, Variant};

/// Source of uniform draws in `[0, 100)`.
pub trait RandomSource: Send + Sync {
    fn draw(&self) -> f64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn draw(&self) -> f64 {
        rand::thread_rng().gen_range(0.0..100.0)
    }
}

/// Always returns the same draw.
#[derive(Debug, Clone, Copy)]
pub struct FixedDraw(pub f64);

impl RandomSource for FixedDraw {
    fn draw(&self) -> f64 {
        self.0
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AssignError {
    #[error("a/b test is not active")]
    Inactive,
    #[error("a/b test has no variants")]
    NoVariants,
}

/// First variant whose cumulative percentage reaches `r`; the first variant
/// when the draw lands past the last boundary.
pub fn pick_variant(variants: &[Variant], r: f64) -> Option<&Variant> {
    let mut cumulative = 0.0;
    for variant in variants {
        cumulative += f64::from(variant.traffic_percentage);
        if r <= cumulative {
            return Some(variant);
        }
    }
    variants.first()
}

pub fn assign<'a>(test: &'a AbTest, random: &dyn RandomSource) -> Result<&'a Variant, AssignError> {
    if test.status != AbTestStatus::Active {
        return Err(AssignError::Inactive);
    }
    pick_variant(&test.variants, random.draw()).ok_or(AssignError::NoVariants)
}

/// Redirect target carrying the measurement parameters downstream analytics
/// rely on.
pub fn redirect_url(quiz_slug: &str, test_slug: &str, variant_id: Uuid) -> String {
    format!(
        "/quiz/{}?utm_source=ab_test&utm_campaign={}&utm_content={}",
        quiz_slug, test_slug, variant_id
    )
}
