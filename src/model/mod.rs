// Package model provides the normalized news item and fetch result models.

pub mod item;


pub use item::NewsItem;
