//! Post composer state.
//!
//! The composer walks `Select -> Crop -> Filter -> Details`. It keeps the
//! chosen images and per-image filter names; rendering a filter is the
//! front end's job.

use crate::api::{ApiError, UploadFile};
use crate::model::Post;
use crate::mutations::Mutations;
use crate::toast::{Language, Notice};

/// Captions longer than this are rejected by the backend.
pub const CAPTION_LIMIT: usize = 2200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterPreset {
    pub id: &'static str,
    pub name: &'static str,
    pub name_ar: &'static str,
}

pub const FILTERS: &[FilterPreset] = &[
    FilterPreset { id: "none", name: "Original", name_ar: "الأصل" },
    FilterPreset { id: "clarendon", name: "Clarendon", name_ar: "Clarendon" },
    FilterPreset { id: "gingham", name: "Gingham", name_ar: "Gingham" },
    FilterPreset { id: "moon", name: "Moon", name_ar: "Moon" },
    FilterPreset { id: "lark", name: "Lark", name_ar: "Lark" },
    FilterPreset { id: "reyes", name: "Reyes", name_ar: "Reyes" },
    FilterPreset { id: "juno", name: "Juno", name_ar: "Juno" },
    FilterPreset { id: "slumber", name: "Slumber", name_ar: "Slumber" },
    FilterPreset { id: "crema", name: "Crema", name_ar: "Crema" },
    FilterPreset { id: "ludwig", name: "Ludwig", name_ar: "Ludwig" },
    FilterPreset { id: "aden", name: "Aden", name_ar: "Aden" },
    FilterPreset { id: "perpetua", name: "Perpetua", name_ar: "Perpetua" },
];

pub fn find_filter(id: &str) -> Option<&'static FilterPreset> {
    FILTERS.iter().find(|f| f.id == id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Select,
    Crop,
    Filter,
    Details,
}

impl Step {
    pub fn title(&self, language: Language) -> &'static str {
        match (self, language) {
            (Step::Crop, Language::Arabic) => "اقتصاص",
            (Step::Crop, Language::English) => "Crop",
            (Step::Filter, Language::Arabic) => "تعديل",
            (Step::Filter, Language::English) => "Edit",
            (_, Language::Arabic) => "إنشاء منشور جديد",
            (_, Language::English) => "Create new post",
        }
    }
}

#[derive(Debug)]
pub enum ComposerError {
    NoImage,
    UnknownFilter(String),
    CaptionTooLong(usize),
    Api(ApiError),
}

impl std::fmt::Display for ComposerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComposerError::NoImage => write!(f, "add at least one image"),
            ComposerError::UnknownFilter(id) => write!(f, "unknown filter '{id}'"),
            ComposerError::CaptionTooLong(n) => {
                write!(f, "caption is {n} characters (limit {CAPTION_LIMIT})")
            }
            ComposerError::Api(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ComposerError {}

impl From<ApiError> for ComposerError {
    fn from(e: ApiError) -> Self {
        ComposerError::Api(e)
    }
}

#[derive(Debug, Clone)]
pub struct SelectedImage {
    pub file: UploadFile,
    pub filter: &'static str,
}

#[derive(Debug)]
pub struct PostComposer {
    step: Step,
    images: Vec<SelectedImage>,
    current: usize,
    caption: String,
    location: String,
    pub hide_like_count: bool,
    pub hide_comments: bool,
}

impl Default for PostComposer {
    fn default() -> Self {
        Self::new()
    }
}

impl PostComposer {
    pub fn new() -> Self {
        Self {
            step: Step::Select,
            images: Vec::new(),
            current: 0,
            caption: String::new(),
            location: String::new(),
            hide_like_count: false,
            hide_comments: false,
        }
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn images(&self) -> &[SelectedImage] {
        &self.images
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current_image(&self) -> Option<&SelectedImage> {
        self.images.get(self.current)
    }

    pub fn caption(&self) -> &str {
        &self.caption
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Add files; anything that is not an image is skipped. Returns how many
    /// were accepted. The first accepted image moves the composer to `Crop`.
    pub fn add_files(&mut self, files: Vec<UploadFile>) -> usize {
        let was_empty = self.images.is_empty();
        let before = self.images.len();
        self.images.extend(
            files
                .into_iter()
                .filter(UploadFile::is_image)
                .map(|file| SelectedImage { file, filter: "none" }),
        );
        let added = self.images.len() - before;
        if was_empty && added > 0 {
            self.step = Step::Crop;
        }
        added
    }

    pub fn remove(&mut self, index: usize) {
        if index >= self.images.len() {
            return;
        }
        self.images.remove(index);
        if self.images.is_empty() {
            self.step = Step::Select;
        }
        if self.current >= self.images.len() {
            self.current = self.images.len().saturating_sub(1);
        }
    }

    pub fn next_image(&mut self) {
        if !self.images.is_empty() {
            self.current = (self.current + 1) % self.images.len();
        }
    }

    pub fn previous_image(&mut self) {
        if !self.images.is_empty() {
            self.current = (self.current + self.images.len() - 1) % self.images.len();
        }
    }

    pub fn select_image(&mut self, index: usize) {
        if index < self.images.len() {
            self.current = index;
        }
    }

    pub fn can_go_next(&self) -> bool {
        !self.images.is_empty() && self.step != Step::Details
    }

    pub fn can_go_back(&self) -> bool {
        self.step != Step::Select
    }

    pub fn next(&mut self) {
        if !self.can_go_next() {
            return;
        }
        self.step = match self.step {
            Step::Select => Step::Crop,
            Step::Crop => Step::Filter,
            Step::Filter | Step::Details => Step::Details,
        };
    }

    pub fn back(&mut self) {
        self.step = match self.step {
            Step::Details => Step::Filter,
            Step::Filter => Step::Crop,
            Step::Crop | Step::Select => Step::Select,
        };
    }

    /// Apply a filter to the current image.
    pub fn apply_filter(&mut self, id: &str) -> Result<(), ComposerError> {
        let preset = find_filter(id).ok_or_else(|| ComposerError::UnknownFilter(id.to_string()))?;
        if let Some(image) = self.images.get_mut(self.current) {
            image.filter = preset.id;
        }
        Ok(())
    }

    pub fn set_caption(&mut self, caption: &str) -> Result<(), ComposerError> {
        let len = caption.chars().count();
        if len > CAPTION_LIMIT {
            return Err(ComposerError::CaptionTooLong(len));
        }
        self.caption = caption.to_string();
        Ok(())
    }

    pub fn set_location(&mut self, location: &str) {
        self.location = location.trim().to_string();
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Upload the first image and create the post. The composer resets on
    /// success and keeps its state on failure.
    pub fn publish(
        &mut self,
        mutations: &Mutations,
        progress: Option<&mut dyn FnMut(u8)>,
    ) -> Result<Post, ComposerError> {
        let Some(first) = self.images.first() else {
            mutations.notify(Notice::ComposerNeedsImage);
            return Err(ComposerError::NoImage);
        };

        let image_url = match mutations.api().upload_post_image(&first.file, progress) {
            Ok(url) => url,
            Err(e) => {
                crate::tlog!("composer: image upload failed: {}", e);
                mutations.notify(Notice::PostPublishFailed);
                return Err(e.into());
            }
        };
        let location = (!self.location.is_empty()).then_some(self.location.as_str());
        let post = mutations.create_post_with_notice(
            &self.caption,
            &image_url,
            location,
            Notice::ComposerPosted,
        )?;
        self.reset();
        Ok(post)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(name: &str) -> UploadFile {
        UploadFile::new(name, vec![0u8; 4])
    }

    #[test]
    fn only_images_are_accepted() {
        let mut composer = PostComposer::new();
        let added = composer.add_files(vec![image("a.png"), UploadFile::new("notes.txt", vec![1])]);
        assert_eq!(added, 1);
        assert_eq!(composer.step(), Step::Crop);
        assert_eq!(composer.images()[0].filter, "none");
    }

    #[test]
    fn navigation_wraps_and_removal_clamps() {
        let mut composer = PostComposer::new();
        composer.add_files(vec![image("a.jpg"), image("b.jpg"), image("c.jpg")]);
        composer.previous_image();
        assert_eq!(composer.current_index(), 2);
        composer.next_image();
        assert_eq!(composer.current_index(), 0);

        composer.select_image(2);
        composer.remove(2);
        assert_eq!(composer.current_index(), 1);
        composer.remove(0);
        composer.remove(0);
        assert_eq!(composer.step(), Step::Select);
        assert_eq!(composer.current_index(), 0);
    }

    #[test]
    fn steps_advance_only_with_images() {
        let mut composer = PostComposer::new();
        composer.next();
        assert_eq!(composer.step(), Step::Select);

        composer.add_files(vec![image("a.webp")]);
        composer.next();
        composer.next();
        assert_eq!(composer.step(), Step::Details);
        assert!(!composer.can_go_next());
        composer.back();
        assert_eq!(composer.step(), Step::Filter);
        assert_eq!(composer.step().title(Language::English), "Edit");
    }

    #[test]
    fn filters_come_from_the_catalog() {
        let mut composer = PostComposer::new();
        composer.add_files(vec![image("a.png"), image("b.png")]);
        composer.next_image();
        composer.apply_filter("juno").unwrap();
        assert_eq!(composer.images()[0].filter, "none");
        assert_eq!(composer.images()[1].filter, "juno");
        assert!(composer.apply_filter("sepia").is_err());
        assert_eq!(FILTERS.len(), 12);
        assert_eq!(find_filter("none").map(|f| f.name), Some("Original"));
    }

    #[test]
    fn caption_limit() {
        let mut composer = PostComposer::new();
        assert!(composer.set_caption(&"x".repeat(CAPTION_LIMIT)).is_ok());
        assert!(matches!(
            composer.set_caption(&"x".repeat(CAPTION_LIMIT + 1)),
            Err(ComposerError::CaptionTooLong(_))
        ));
    }
}
