//! User-facing notices.
//!
//! Every toast the client can raise is a [`Notice`]; [`Notice::toast`]
//! renders it in the active [`Language`]. Front ends implement [`Notifier`]
//! to show toasts and incoming-message alerts.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Language {
    #[default]
    Arabic,
    English,
}

impl Language {
    pub fn code(&self) -> &'static str {
        match self {
            Language::Arabic => "ar",
            Language::English => "en",
        }
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ar" | "arabic" => Ok(Language::Arabic),
            "en" | "english" => Ok(Language::English),
            other => Err(format!("unknown language '{other}' (expected ar or en)")),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastVariant {
    Default,
    Destructive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub variant: ToastVariant,
    pub title: String,
    pub description: Option<String>,
}

/// Alert raised for an incoming message outside the open thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageAlert {
    pub sender_id: String,
    pub sender_name: String,
    pub avatar_url: String,
    pub preview: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    ProfileUpdated,
    ProfileUpdateFailed,
    PostPublished,
    PostPublishFailed,
    PostDeleted,
    PostDeleteFailed,
    CommentFailed,
    StoryPublished,
    StoryFailed,
    LikeFailed,
    SaveFailed,
    FollowFailed,
    MessageSendFailed,
    MessageEdited,
    MessageEditFailed,
    MessageDeleted,
    MessageDeleteFailed,
    ComposerNeedsImage,
    ComposerPosted,
}

impl Notice {
    pub fn variant(&self) -> ToastVariant {
        match self {
            Notice::ProfileUpdated
            | Notice::PostPublished
            | Notice::PostDeleted
            | Notice::StoryPublished
            | Notice::MessageEdited
            | Notice::MessageDeleted
            | Notice::ComposerPosted => ToastVariant::Default,
            _ => ToastVariant::Destructive,
        }
    }

    /// `(title, description)` in Arabic and English.
    fn text(&self) -> ((&'static str, Option<&'static str>), (&'static str, Option<&'static str>)) {
        match self {
            Notice::ProfileUpdated => (
                ("تم التحديث", Some("تم تحديث الملف الشخصي بنجاح")),
                ("Updated", Some("Profile updated successfully")),
            ),
            Notice::ProfileUpdateFailed => (
                ("خطأ", Some("فشل تحديث الملف الشخصي")),
                ("Error", Some("Failed to update profile")),
            ),
            Notice::PostPublished => (
                ("تم النشر", Some("تم نشر المنشور بنجاح")),
                ("Published", Some("Post published successfully")),
            ),
            Notice::PostPublishFailed => (
                ("خطأ", Some("فشل نشر المنشور")),
                ("Error", Some("Failed to publish post")),
            ),
            Notice::PostDeleted => (
                ("تم الحذف", Some("تم حذف المنشور بنجاح")),
                ("Deleted", Some("Post deleted successfully")),
            ),
            Notice::PostDeleteFailed => (
                ("خطأ", Some("فشل حذف المنشور")),
                ("Error", Some("Failed to delete post")),
            ),
            Notice::CommentFailed => (
                ("خطأ", Some("فشل إضافة التعليق")),
                ("Error", Some("Failed to add comment")),
            ),
            Notice::StoryPublished => (
                ("تم النشر", Some("تم نشر القصة بنجاح")),
                ("Published", Some("Story published successfully")),
            ),
            Notice::StoryFailed => (
                ("خطأ", Some("فشل نشر القصة")),
                ("Error", Some("Failed to publish story")),
            ),
            Notice::LikeFailed => (
                ("خطأ", Some("فشل تسجيل الإعجاب")),
                ("Error", Some("Failed to update like")),
            ),
            Notice::SaveFailed => (
                ("خطأ", Some("فشل حفظ المنشور")),
                ("Error", Some("Failed to update saved post")),
            ),
            Notice::FollowFailed => (
                ("خطأ", Some("فشل تحديث المتابعة")),
                ("Error", Some("Failed to update follow")),
            ),
            Notice::MessageSendFailed => (
                ("خطأ", Some("فشل إرسال الرسالة")),
                ("Error", Some("Failed to send message")),
            ),
            Notice::MessageEdited => (("تم تعديل الرسالة", None), ("Message edited", None)),
            Notice::MessageEditFailed => (
                ("خطأ", Some("فشل تعديل الرسالة")),
                ("Error", Some("Failed to edit message")),
            ),
            Notice::MessageDeleted => (("تم حذف الرسالة", None), ("Message deleted", None)),
            Notice::MessageDeleteFailed => (
                ("خطأ", Some("فشل حذف الرسالة")),
                ("Error", Some("Failed to delete message")),
            ),
            Notice::ComposerNeedsImage => (
                ("يرجى إضافة صورة واحدة على الأقل", None),
                ("Please add at least one image", None),
            ),
            Notice::ComposerPosted => (("تم النشر!", None), ("Posted!", None)),
        }
    }

    pub fn toast(&self, language: Language) -> Toast {
        let (ar, en) = self.text();
        let (title, description) = match language {
            Language::Arabic => ar,
            Language::English => en,
        };
        Toast {
            variant: self.variant(),
            title: title.to_string(),
            description: description.map(str::to_string),
        }
    }
}

/// UI sink for toasts and message alerts.
pub trait Notifier: Send + Sync {
    fn toast(&self, toast: Toast);

    fn message_alert(&self, alert: MessageAlert);

    /// The open thread's counterpart started or stopped typing.
    fn typing(&self, _user_id: &str, _typing: bool) {}
}

/// Notifier that only logs. Used when no front end is attached.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn toast(&self, toast: Toast) {
        crate::tlog!(
            "toast: {}{}",
            toast.title,
            toast
                .description
                .map(|d| format!(" - {d}"))
                .unwrap_or_default()
        );
    }

    fn message_alert(&self, alert: MessageAlert) {
        crate::tlog!(
            "message from {}: {}",
            crate::logging::user_id(&alert.sender_id),
            alert.preview
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_in_both_languages() {
        let ar = Notice::PostDeleted.toast(Language::Arabic);
        assert_eq!(ar.title, "تم الحذف");
        assert_eq!(ar.description.as_deref(), Some("تم حذف المنشور بنجاح"));
        assert_eq!(ar.variant, ToastVariant::Default);

        let en = Notice::MessageEdited.toast(Language::English);
        assert_eq!(en.title, "Message edited");
        assert_eq!(en.description, None);
    }

    #[test]
    fn failures_are_destructive() {
        assert_eq!(
            Notice::MessageDeleteFailed.toast(Language::Arabic).variant,
            ToastVariant::Destructive
        );
        assert_eq!(Notice::ComposerNeedsImage.variant(), ToastVariant::Destructive);
    }

    #[test]
    fn parses_language_codes() {
        assert_eq!("AR".parse::<Language>(), Ok(Language::Arabic));
        assert_eq!("english".parse::<Language>(), Ok(Language::English));
        assert!("fr".parse::<Language>().is_err());
        assert_eq!(Language::English.to_string(), "en");
    }
}
