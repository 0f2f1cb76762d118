//! Shared helpers: the row mapping type, the `Arrayable` capability and
//! string helpers used for table naming and download file names.

use serde_json::{Map, Value};

/// A database row, or any other string-keyed mapping of JSON values.
pub type Record = Map<String, Value>;

/// Types that can present themselves as a mapping.
///
/// [`ResponseFactory::json`](crate::factory::ResponseFactory::json) converts
/// `Arrayable` values with `to_array` before encoding them.
pub trait Arrayable {
    fn to_array(&self) -> Record;
}

impl Arrayable for Record {
    fn to_array(&self) -> Record {
        self.clone()
    }
}

/// Convert a type name to `snake_case`.
///
/// A `_` is placed after every character that is followed by an uppercase
/// letter, then the result is lowercased. Strings that are already all
/// lowercase come back untouched, so `HTMLParser` becomes `h_t_m_l_parser`.
pub fn snake_case(value: &str) -> String {
    if !value.chars().any(char::is_uppercase) {
        return value.to_string();
    }

    let mut out = String::with_capacity(value.len() + 4);
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        out.push(c);
        if chars.peek().is_some_and(|next| next.is_uppercase()) {
            out.push('_');
        }
    }
    out.to_lowercase()
}

/// Strip the module path and any generic arguments from a Rust type name.
///
/// `app::models::UserProfile` -> `UserProfile`,
/// `app::Wrapper<app::Inner>` -> `Wrapper`.
pub fn class_basename(type_name: &str) -> &str {
    let without_generics = match type_name.find('<') {
        Some(idx) => &type_name[..idx],
        None => type_name,
    };
    without_generics
        .rsplit("::")
        .next()
        .unwrap_or(without_generics)
}

/// Transliterate a string to ASCII.
///
/// Latin letters with diacritics map to their base letters (`é` -> `e`,
/// `ß` -> `ss`); characters without a known mapping are dropped.
pub fn ascii(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if c.is_ascii() {
            out.push(c);
        } else if let Some(replacement) = transliterate(c) {
            out.push_str(replacement);
        }
    }
    out
}

fn transliterate(c: char) -> Option<&'static str> {
    let s = match c {
        'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' | 'Ā' | 'Ă' | 'Ą' => "A",
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ă' | 'ą' => "a",
        'Æ' => "AE",
        'æ' => "ae",
        'Ç' | 'Ć' | 'Ĉ' | 'Ċ' | 'Č' => "C",
        'ç' | 'ć' | 'ĉ' | 'ċ' | 'č' => "c",
        'Ð' | 'Ď' | 'Đ' => "D",
        'ð' | 'ď' | 'đ' => "d",
        'È' | 'É' | 'Ê' | 'Ë' | 'Ē' | 'Ĕ' | 'Ė' | 'Ę' | 'Ě' => "E",
        'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ĕ' | 'ė' | 'ę' | 'ě' => "e",
        'Ĝ' | 'Ğ' | 'Ġ' | 'Ģ' => "G",
        'ĝ' | 'ğ' | 'ġ' | 'ģ' => "g",
        'Ĥ' | 'Ħ' => "H",
        'ĥ' | 'ħ' => "h",
        'Ì' | 'Í' | 'Î' | 'Ï' | 'Ĩ' | 'Ī' | 'Ĭ' | 'Į' | 'İ' => "I",
        'ì' | 'í' | 'î' | 'ï' | 'ĩ' | 'ī' | 'ĭ' | 'į' | 'ı' => "i",
        'Ĵ' => "J",
        'ĵ' => "j",
        'Ķ' => "K",
        'ķ' => "k",
        'Ĺ' | 'Ļ' | 'Ľ' | 'Ŀ' | 'Ł' => "L",
        'ĺ' | 'ļ' | 'ľ' | 'ŀ' | 'ł' => "l",
        'Ñ' | 'Ń' | 'Ņ' | 'Ň' => "N",
        'ñ' | 'ń' | 'ņ' | 'ň' => "n",
        'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' | 'Ø' | 'Ō' | 'Ŏ' | 'Ő' => "O",
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'ō' | 'ŏ' | 'ő' => "o",
        'Œ' => "OE",
        'œ' => "oe",
        'Ŕ' | 'Ŗ' | 'Ř' => "R",
        'ŕ' | 'ŗ' | 'ř' => "r",
        'Ś' | 'Ŝ' | 'Ş' | 'Š' => "S",
        'ś' | 'ŝ' | 'ş' | 'š' => "s",
        'ß' => "ss",
        'Ţ' | 'Ť' | 'Ŧ' => "T",
        'ţ' | 'ť' | 'ŧ' => "t",
        'Þ' => "TH",
        'þ' => "th",
        'Ù' | 'Ú' | 'Û' | 'Ü' | 'Ũ' | 'Ū' | 'Ŭ' | 'Ů' | 'Ű' | 'Ų' => "U",
        'ù' | 'ú' | 'û' | 'ü' | 'ũ' | 'ū' | 'ŭ' | 'ů' | 'ű' | 'ų' => "u",
        'Ŵ' => "W",
        'ŵ' => "w",
        'Ý' | 'Ÿ' | 'Ŷ' => "Y",
        'ý' | 'ÿ' | 'ŷ' => "y",
        'Ź' | 'Ż' | 'Ž' => "Z",
        'ź' | 'ż' | 'ž' => "z",
        '‘' | '’' | '‚' | '′' => "'",
        '“' | '”' | '„' | '″' => "\"",
        '–' | '—' => "-",
        '\u{a0}' => " ",
        _ => return None,
    };
    Some(s)
}

