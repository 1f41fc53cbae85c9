// src/engine/core/mod.rs
// Engine Core モジュール - スキーマツリーの解釈を分割したモジュール群

pub mod component;
pub mod event;
pub mod flow;
pub mod render;
pub mod utils;

// 公開API
pub use event::{BoundEvent, Dispatch};
pub use render::{
    ElementNode, RenderNode, RenderOptions, Renderer, elements, find_by_key, outline, text_content,
};
