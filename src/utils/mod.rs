/// 工具模块
/// Utility modules
pub mod enhancer;

pub use enhancer::{enhance, EnhanceParams};
