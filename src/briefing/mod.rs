//! Selecting, introducing and presenting a day's briefing.

pub mod composer;
pub mod intro;
pub mod render;

pub use composer::{briefing_items, compose, deliver};
pub use intro::generate_intro;
pub use render::{BriefingView, FooterStats, HtmlFilePresenter, Presenter};
