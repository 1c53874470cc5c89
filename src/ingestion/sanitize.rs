//! Cell sanitation and name derivation.
//!
//! Every cell value passes through [`clean_cell`] exactly once, when the sheet is read.

use unicode_normalization::UnicodeNormalization;

use crate::types::TableSchema;

/// Normalize a cell value for storage.
///
/// - characters outside the Basic Multilingual Plane are removed
/// - compatibility decomposition (NFKD)
/// - surrounding whitespace is trimmed
///
/// Astral characters go before decomposition: dropping one that sits between two combining
/// marks would otherwise leave the marks out of canonical order, and a second pass would
/// reorder them. Applying it twice gives the same result as applying it once.
pub fn clean_cell(raw: &str) -> String {
    let normalized: String = raw
        .chars()
        .filter(|c| is_bmp(*c))
        .nfkd()
        .filter(|c| is_bmp(*c))
        .collect();
    normalized.trim().to_string()
}

fn is_bmp(c: char) -> bool {
    (c as u32) < 0x1_0000
}

/// Table name for a sheet: spaces become underscores, then lowercase.
pub fn table_name(sheet: &str) -> String {
    sheet.replace(' ', "_").to_lowercase()
}

/// Turn a raw header row into unique, non-empty column names.
///
/// Blank headers become `Unnamed: <index>`; repeated names get `.1`, `.2`, ... suffixes.
/// Comparison is case-insensitive, and the surrogate key name ([`TableSchema::KEY_COLUMN`]) is
/// treated as already taken.
pub fn header_names(raw: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(raw.len());
    for (idx, h) in raw.iter().enumerate() {
        let cleaned = clean_cell(h);
        let base = if cleaned.is_empty() {
            format!("Unnamed: {idx}")
        } else {
            cleaned
        };

        let mut candidate = base.clone();
        let mut n = 0usize;
        while candidate.eq_ignore_ascii_case(TableSchema::KEY_COLUMN)
            || out.iter().any(|existing| existing.eq_ignore_ascii_case(&candidate))
        {
            n += 1;
            candidate = format!("{base}.{n}");
        }
        out.push(candidate);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_astral_characters_only() {
        assert_eq!(clean_cell("solar \u{1F31E} energy"), "solar  energy");
        assert_eq!(clean_cell("\u{10348}x"), "x");
        // BMP arrows survive.
        assert_eq!(clean_cell("a \u{27AA} b"), "a \u{27AA} b");
    }

    #[test]
    fn trims_and_decomposes() {
        assert_eq!(clean_cell("  value \t\n"), "value");
        // NFKD splits the accent off and folds the ligature.
        assert_eq!(clean_cell("caf\u{e9}"), "cafe\u{301}");
        assert_eq!(clean_cell("\u{fb01}le"), "file");
        // No-break spaces fold to plain spaces and are trimmed.
        assert_eq!(clean_cell("\u{a0}x\u{a0}"), "x");
    }

    #[test]
    fn cleaning_is_idempotent() {
        let samples = [
            "",
            "   ",
            "plain",
            " Emergia \u{1F30D} (sej/g) ",
            "S\u{e3}o Paulo",
            "\u{2460} circled",
            "\u{1F600}\u{1F600}",
            "x\u{a0}\u{1F4A9}\u{a0}",
            "a\u{301}\u{1F600}\u{327}",
            "\u{1F600}\u{301}x",
        ];
        for s in samples {
            let once = clean_cell(s);
            assert_eq!(clean_cell(&once), once, "input {s:?}");
        }
    }

    #[test]
    fn marks_around_a_dropped_astral_char_are_reordered() {
        // U+0327 (ccc 202) sorts before U+0301 (ccc 230) once the emoji between them is gone.
        assert_eq!(clean_cell("a\u{301}\u{1F600}\u{327}"), "a\u{327}\u{301}");
    }

    #[test]
    fn table_name_rules() {
        assert_eq!(table_name("UEV Library"), "uev_library");
        assert_eq!(table_name("Sheet1"), "sheet1");
        assert_eq!(table_name("  a b  "), "__a_b__");
        for s in ["UEV Library", "Mixed Case Name", "x"] {
            let once = table_name(s);
            assert_eq!(table_name(&once), once);
        }
    }

    #[test]
    fn header_names_fill_blanks_and_dedupe() {
        let raw: Vec<String> = ["Item", "", "Item", " Value ", "item"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            header_names(&raw),
            vec!["Item", "Unnamed: 1", "Item.1", "Value", "item.2"]
        );
    }

    #[test]
    fn header_names_never_shadow_the_key_column() {
        let raw: Vec<String> = ["ID", "Name", "id.1"].iter().map(|s| s.to_string()).collect();
        assert_eq!(header_names(&raw), vec!["ID.1", "Name", "id.1.1"]);
    }
}
