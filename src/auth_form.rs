//! Sign-in and sign-up form validation.

use crate::toast::{Language, Toast, ToastVariant};

pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    SignIn,
    SignUp,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthForm {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub username: String,
    pub birth_month: Option<u8>,
    pub birth_day: Option<u8>,
    pub birth_year: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormError {
    MissingFields,
    InvalidEmail,
    WeakPassword,
}

impl FormError {
    pub fn toast(&self, language: Language) -> Toast {
        let (title, description) = match (self, language) {
            (FormError::MissingFields, Language::Arabic) => {
                ("خطأ في التحقق", "يرجى ملء جميع الحقول")
            }
            (FormError::MissingFields, Language::English) => {
                ("Validation error", "Please fill in all fields")
            }
            (FormError::InvalidEmail, Language::Arabic) => {
                ("خطأ في البريد الإلكتروني", "يرجى إدخال بريد إلكتروني صحيح")
            }
            (FormError::InvalidEmail, Language::English) => {
                ("Email error", "Please enter a valid email address")
            }
            (FormError::WeakPassword, Language::Arabic) => {
                ("كلمة مرور ضعيفة", "يجب أن تتكون كلمة المرور من 8 أحرف على الأقل")
            }
            (FormError::WeakPassword, Language::English) => {
                ("Weak password", "Password must be at least 8 characters")
            }
        };
        Toast {
            variant: ToastVariant::Destructive,
            title: title.to_string(),
            description: Some(description.to_string()),
        }
    }
}

impl std::fmt::Display for FormError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let toast = self.toast(Language::English);
        write!(f, "{}", toast.description.unwrap_or(toast.title))
    }
}

impl std::error::Error for FormError {}

/// `local@domain.tld`: one `@`, no whitespace, and a dot inside the domain.
pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    let chars: Vec<char> = domain.chars().collect();
    chars.len() >= 3 && chars[1..chars.len() - 1].contains(&'.')
}

impl AuthForm {
    pub fn validate(&self, mode: Mode) -> Result<(), FormError> {
        if self.email.is_empty() || self.password.is_empty() {
            return Err(FormError::MissingFields);
        }
        if !is_valid_email(&self.email) {
            return Err(FormError::InvalidEmail);
        }
        if mode == Mode::SignUp {
            let incomplete = self.full_name.trim().is_empty()
                || self.username.trim().is_empty()
                || self.birth_month.is_none()
                || self.birth_day.is_none()
                || self.birth_year.is_none();
            if incomplete {
                return Err(FormError::MissingFields);
            }
            if self.password.chars().count() < MIN_PASSWORD_LEN {
                return Err(FormError::WeakPassword);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrengthLabel {
    Weak,
    Medium,
    Good,
    VeryStrong,
}

impl StrengthLabel {
    pub fn text(&self, language: Language) -> &'static str {
        match (self, language) {
            (StrengthLabel::Weak, Language::Arabic) => "ضعيفة",
            (StrengthLabel::Weak, Language::English) => "Weak",
            (StrengthLabel::Medium, Language::Arabic) => "متوسطة",
            (StrengthLabel::Medium, Language::English) => "Medium",
            (StrengthLabel::Good, Language::Arabic) => "جيدة",
            (StrengthLabel::Good, Language::English) => "Good",
            (StrengthLabel::VeryStrong, Language::Arabic) => "قوية جداً",
            (StrengthLabel::VeryStrong, Language::English) => "Very strong",
        }
    }
}

/// Score 0..=5 and its label. An empty password has no label.
pub fn password_strength(password: &str) -> (u8, Option<StrengthLabel>) {
    if password.is_empty() {
        return (0, None);
    }
    let len = password.chars().count();
    let checks = [
        len >= 8,
        len >= 12,
        password.chars().any(|c| c.is_ascii_lowercase())
            && password.chars().any(|c| c.is_ascii_uppercase()),
        password.chars().any(|c| c.is_ascii_digit()),
        password.chars().any(|c| !c.is_ascii_alphanumeric()),
    ];
    let score = checks.iter().filter(|&&ok| ok).count() as u8;
    let label = match score {
        0..=2 => StrengthLabel::Weak,
        3 => StrengthLabel::Medium,
        4 => StrengthLabel::Good,
        _ => StrengthLabel::VeryStrong,
    };
    (score, Some(label))
}
