//! Prompt builder and localized labels

use serde::{Deserialize, Serialize};

/// Output language of prompts and user-visible messages
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Vietnamese,
    English,
}

impl Language {
    /// `en` selects English; any other code falls back to Vietnamese
    pub fn from_code(code: &str) -> Self {
        if code.trim().eq_ignore_ascii_case("en") {
            Language::English
        } else {
            Language::Vietnamese
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Language::Vietnamese => "vi",
            Language::English => "en",
        }
    }

    /// Prefix of the message replacing a failed assistant turn
    pub fn error_prefix(&self) -> &'static str {
        match self {
            Language::Vietnamese => "Lỗi kết nối",
            Language::English => "Connection error",
        }
    }

    /// Content of a turn stopped before anything was written
    pub fn stopped_message(&self) -> &'static str {
        match self {
            Language::Vietnamese => "Đã dừng phản hồi.",
            Language::English => "Response stopped.",
        }
    }

    /// Known conservation status labels with their display colors
    pub fn conservation_statuses(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            Language::Vietnamese => &[
                ("Cực kỳ nguy cấp", "#8B0000"),
                ("Nguy cấp", "#8B0000"),
                ("Sách Đỏ Việt Nam", "#c97408"),
                ("Sách Đỏ", "#c97408"),
                ("Sắp nguy cấp", "#eddb11"),
                ("Ít lo ngại", "#55f200"),
                ("Chưa đánh giá", "#05deff"),
            ],
            Language::English => &[
                ("Critically Endangered", "#8B0000"),
                ("Endangered", "#8B0000"),
                ("Vulnerable (Vietnam Red Data Book)", "#c97408"),
                ("Vulnerable", "#c97408"),
                ("Near Threatened", "#eddb11"),
                ("Least Concern", "#55f200"),
                ("Not Evaluated", "#05deff"),
            ],
        }
    }
}

/// Taxonomic ranks shown in the enrichment result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rank {
    Kingdom,
    Phylum,
    Class,
    Order,
    Family,
    Genus,
    Species,
}

impl Rank {
    /// Label the model tends to prefix the value with
    pub fn label(&self, language: Language) -> &'static str {
        match (language, self) {
            (Language::Vietnamese, Rank::Kingdom) => "Giới",
            (Language::Vietnamese, Rank::Phylum) => "Ngành",
            (Language::Vietnamese, Rank::Class) => "Lớp",
            (Language::Vietnamese, Rank::Order) => "Bộ",
            (Language::Vietnamese, Rank::Family) => "Họ",
            (Language::Vietnamese, Rank::Genus) => "Chi",
            (Language::Vietnamese, Rank::Species) => "Loài",
            (Language::English, Rank::Kingdom) => "Kingdom",
            (Language::English, Rank::Phylum) => "Phylum",
            (Language::English, Rank::Class) => "Class",
            (Language::English, Rank::Order) => "Order",
            (Language::English, Rank::Family) => "Family",
            (Language::English, Rank::Genus) => "Genus",
            (Language::English, Rank::Species) => "Species",
        }
    }
}

const NAME_PLACEHOLDER: &str = "{scientific_name}";

const TAXONOMY_VI: &str = r#"Cung cấp thông tin phân loại khoa học về "{scientific_name}" bằng Tiếng Việt.

Trả về JSON với format:
{
  "commonName": "Tên thường gọi Tiếng Việt",
  "kingdom": "Tên Tiếng Việt",
  "phylum": "Tên Tiếng Việt",
  "className": "Tên Tiếng Việt",
  "taxorder": "Tên Tiếng Việt",
  "family": "Tên khoa học",
  "genus": "Tên khoa học",
  "species": "Tên khoa học"
}

CHỈ TRẢ VỀ JSON, KHÔNG THÊM TEXT KHÁC."#;

const TAXONOMY_EN: &str = r#"Provide taxonomic classification for "{scientific_name}" in English.

Return JSON format:
{
  "commonName": "Common name",
  "kingdom": "Kingdom name",
  "phylum": "Phylum name",
  "className": "Class name",
  "taxorder": "Order name",
  "family": "Family name",
  "genus": "Genus name",
  "species": "Species name"
}

RETURN ONLY JSON, NO ADDITIONAL TEXT."#;

const DETAILS_VI: &str = r#"Cung cấp thông tin chi tiết về "{scientific_name}" bằng Tiếng Việt.

=== QUY TẮC FORMAT ===
- Dùng ** để in đậm (ví dụ: **từ khóa**)
- Dùng ## để highlight xanh (ví dụ: ##Việt Nam##)
- Dùng • cho bullet points

=== JSON FORMAT ===
{
  "description": "Tổng quan 4 câu ngắn gọn, dùng **in đậm** cho đặc điểm nổi bật và ##xanh đậm## cho địa danh, tên riêng, số đo.",
  "characteristics": "Danh sách gạch đầu dòng, mỗi dòng bắt đầu với • và một ý về hình thái, kích thước, màu sắc. Dùng **in đậm** và ##xanh đậm##.",
  "distribution": "Ưu tiên Việt Nam trước (nếu có), sau đó toàn cầu. Dùng ##xanh đậm## cho tên địa danh.",
  "habitat": "Mô tả chi tiết môi trường sống.",
  "conservationStatus": "Chỉ ghi một trong các trạng thái: Cực kỳ nguy cấp, Nguy cấp, Sách Đỏ Việt Nam, Sắp nguy cấp, Ít lo ngại, Chưa đánh giá. Thêm một chút thông tin bổ sung từ IUCN nếu có."
}

CHỈ TRẢ VỀ JSON."#;

const DETAILS_EN: &str = r#"Provide detailed information about "{scientific_name}" in English.

=== FORMAT RULES ===
- Use ** for bold (e.g., **keyword**)
- Use ## for green highlight (e.g., ##Vietnam##)
- Use • for bullet points

=== JSON FORMAT ===
{
  "description": "4-sentence overview with **bold** for key features and ##green highlight## for places/names/measurements.",
  "characteristics": "Bullet list, each line starts with • covering morphology, size, colors. Use **bold** and ##green highlight##.",
  "distribution": "Vietnam first if applicable, then worldwide. Use ##green highlight## for locations.",
  "habitat": "Environment details",
  "conservationStatus": "Only write one of these statuses: Critically Endangered, Endangered, Vulnerable (Vietnam Red Data Book), Near Threatened, Least Concern, Not Evaluated. Add some additional IUCN info if available."
}

RETURN ONLY JSON."#;

/// Prompt asking for the taxonomy JSON of a species
pub fn taxonomy_prompt(scientific_name: &str, language: Language) -> String {
    let template = match language {
        Language::Vietnamese => TAXONOMY_VI,
        Language::English => TAXONOMY_EN,
    };
    template.replace(NAME_PLACEHOLDER, scientific_name)
}

/// Prompt asking for the descriptive details JSON of a species
pub fn details_prompt(scientific_name: &str, language: Language) -> String {
    let template = match language {
        Language::Vietnamese => DETAILS_VI,
        Language::English => DETAILS_EN,
    };
    template.replace(NAME_PLACEHOLDER, scientific_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_from_code() {
        assert_eq!(Language::from_code("en"), Language::English);
        assert_eq!(Language::from_code("EN "), Language::English);
        assert_eq!(Language::from_code("vi"), Language::Vietnamese);
        assert_eq!(Language::from_code("fr"), Language::Vietnamese);
    }

    #[test]
    fn test_prompts_embed_name() {
        let prompt = taxonomy_prompt("Ficus religiosa", Language::English);
        assert!(prompt.contains("\"Ficus religiosa\""));
        assert!(prompt.contains("\"taxorder\""));
        assert!(!prompt.contains(NAME_PLACEHOLDER));

        let prompt = details_prompt("Ficus religiosa", Language::Vietnamese);
        assert!(prompt.contains("\"Ficus religiosa\""));
        assert!(prompt.contains("\"conservationStatus\""));
    }
}
