use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use phf::phf_map;
use std::collections::{HashMap, HashSet};
/// 图片加载
///
/// 从磁盘读取图片文件，校验类型和大小后编码为 data URL
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

use crate::models::{AnalyzeImage, StandardAnswerImageData, StudentSubmissionData};
use crate::services::validator::InputValidator;

/// 扩展名 → MIME 类型
static MIME_BY_EXTENSION: phf::Map<&'static str, &'static str> = phf_map! {
    "jpg" => "image/jpeg",
    "jpeg" => "image/jpeg",
    "png" => "image/png",
    "gif" => "image/gif",
    "webp" => "image/webp",
};

/// 已编码的图片
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedImage {
    /// 文件名（含扩展名）
    pub name: String,
    pub mime_type: &'static str,
    /// 原始字节数
    pub size: u64,
    pub data_url: String,
}

impl LoadedImage {
    /// 不含扩展名的文件名
    pub fn stem(&self) -> &str {
        Path::new(&self.name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.name)
    }

    pub fn to_analyze_image(&self, order: u32) -> AnalyzeImage {
        AnalyzeImage {
            data: self.data_url.clone(),
            order,
            name: self.name.clone(),
        }
    }

    pub fn to_standard_answer_image(&self, order: u32) -> StandardAnswerImageData {
        StandardAnswerImageData {
            data: self.data_url.clone(),
            order,
        }
    }

    /// 以文件名（不含扩展名）作为学生 ID 和姓名
    pub fn to_submission(&self) -> StudentSubmissionData {
        StudentSubmissionData {
            id: self.stem().to_string(),
            name: self.stem().to_string(),
            image_data: self.data_url.clone(),
        }
    }
}

/// 把一组学生图片转换为作答数据，保证学生 ID 互不相同
///
/// 默认用不含扩展名的文件名；多张图片同名（如 `a.png` 和 `a.jpg`）时改用完整文件名，
/// 仍然冲突时追加序号。
pub fn to_submissions(images: &[LoadedImage]) -> Vec<StudentSubmissionData> {
    let mut stem_counts: HashMap<&str, usize> = HashMap::new();
    for image in images {
        *stem_counts.entry(image.stem()).or_default() += 1;
    }

    let mut used = HashSet::new();
    images
        .iter()
        .map(|image| {
            let base = if stem_counts[image.stem()] > 1 {
                image.name.clone()
            } else {
                image.stem().to_string()
            };
            let mut id = base.clone();
            let mut n = 2;
            while !used.insert(id.clone()) {
                id = format!("{}_{}", base, n);
                n += 1;
            }

            let mut submission = image.to_submission();
            submission.id = id;
            submission
        })
        .collect()
}

/// 根据扩展名推断 MIME 类型，不支持的格式返回 `None`
pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    MIME_BY_EXTENSION.get(extension.as_str()).copied()
}

/// 编码为 data URL
pub fn encode_data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type, BASE64.encode(bytes))
}

/// 读取单张图片
pub async fn load_image(path: &Path) -> Result<LoadedImage> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .with_context(|| format!("无效的图片路径: {}", path.display()))?;
    let mime_type = mime_for_path(path)
        .with_context(|| format!("不支持的图片格式: {}", path.display()))?;

    let bytes = fs::read(path)
        .await
        .with_context(|| format!("无法读取图片: {}", path.display()))?;
    let size = bytes.len() as u64;

    InputValidator::validate_file_upload(&name, mime_type, size)
        .into_result()
        .with_context(|| format!("图片未通过校验: {}", name))?;

    Ok(LoadedImage {
        name,
        mime_type,
        size,
        data_url: encode_data_url(mime_type, &bytes),
    })
}

/// 读取文件夹中的所有图片，按文件名排序
///
/// 非图片文件被忽略，无法读取或校验失败的图片记录警告后跳过。
pub async fn load_image_dir(folder_path: &str) -> Result<Vec<LoadedImage>> {
    let folder = PathBuf::from(folder_path);

    if !folder.exists() {
        anyhow::bail!("文件夹不存在: {}", folder_path);
    }

    let mut paths = Vec::new();
    let mut entries = fs::read_dir(&folder)
        .await
        .with_context(|| format!("无法读取文件夹: {}", folder_path))?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.is_file() && mime_for_path(&path).is_some() {
            paths.push(path);
        }
    }
    paths.sort();

    let mut images = Vec::with_capacity(paths.len());
    for path in paths {
        match load_image(&path).await {
            Ok(image) => images.push(image),
            Err(e) => warn!("跳过图片 {}: {:#}", path.display(), e),
        }
    }

    info!("🖼️ 从 {} 加载了 {} 张图片", folder_path, images.len());
    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_for_path() {
        assert_eq!(mime_for_path(Path::new("a/p1.PNG")), Some("image/png"));
        assert_eq!(mime_for_path(Path::new("scan.jpeg")), Some("image/jpeg"));
        assert_eq!(mime_for_path(Path::new("notes.txt")), None);
        assert_eq!(mime_for_path(Path::new("no_extension")), None);
    }

    #[test]
    fn test_encode_data_url() {
        assert_eq!(encode_data_url("image/png", b"hi"), "data:image/png;base64,aGk=");
    }

    #[tokio::test]
    async fn test_load_image_dir_sorted_and_filtered() {
        let dir = std::env::temp_dir().join(format!("ai_grader_images_{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("b.png"), b"png-b").await.unwrap();
        tokio::fs::write(dir.join("a.jpg"), b"jpg-a").await.unwrap();
        tokio::fs::write(dir.join("readme.txt"), b"ignored").await.unwrap();

        let images = load_image_dir(dir.to_str().unwrap()).await.unwrap();
        let names: Vec<_> = images.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["a.jpg", "b.png"]);
        assert!(images[0].data_url.starts_with("data:image/jpeg;base64,"));
        assert_eq!(images[1].to_submission().id, "b");

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    fn image(name: &str) -> LoadedImage {
        LoadedImage {
            name: name.to_string(),
            mime_type: "image/png",
            size: 4,
            data_url: encode_data_url("image/png", name.as_bytes()),
        }
    }

    #[test]
    fn test_submission_ids_are_unique() {
        let images = [
            image("a.jpg"),
            image("a.png"),
            image("a.png.jpg"),
            image("b.png"),
        ];
        let submissions = to_submissions(&images);
        let ids: Vec<_> = submissions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a.jpg", "a.png", "a.png_2", "b"]);
        // 姓名仍然取文件名
        assert_eq!(submissions[0].name, "a");
        assert_eq!(submissions[3].name, "b");
    }

    #[tokio::test]
    async fn test_missing_dir_is_error() {
        assert!(load_image_dir("/definitely/not/here").await.is_err());
    }
}
