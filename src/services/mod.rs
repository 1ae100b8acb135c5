//! 业务能力层
//!
//! - `validator` - 输入校验与清洗
//! - `api_service` - 带校验和统一响应结构的后端直连调用
//! - `image_loader` - 从磁盘读取图片并编码为 data URL
//! - `result_export` - 评分结果导出为 CSV / JSON

pub mod api_service;
pub mod image_loader;
pub mod result_export;
pub mod validator;

pub use api_service::{ApiResponse, ApiService};
pub use image_loader::{load_image_dir, to_submissions, LoadedImage};
pub use result_export::{export_results, ExportRow};
pub use validator::{InputValidator, ValidationError, ValidationErrorKind, ValidationResult};
