//! Numbered pinyin (`ni3 hao3`) to tone marks (`nǐ hǎo`).

/// Converts every whitespace-separated syllable.
pub fn numbered_to_tone_marks(raw: &str) -> String {
    raw.split_whitespace()
        .map(convert_syllable)
        .collect::<Vec<_>>()
        .join(" ")
}

fn convert_syllable(syllable: &str) -> String {
    let (base, tone) = match syllable.chars().last().and_then(|c| c.to_digit(10)) {
        Some(tone) => (&syllable[..syllable.len() - 1], tone),
        None => (syllable, 5),
    };
    let base = base
        .replace("u:", "ü")
        .replace("U:", "Ü")
        .replace('v', "ü")
        .replace('V', "Ü");

    if !(1..=4).contains(&tone) {
        return base;
    }

    let mut chars: Vec<char> = base.chars().collect();
    let Some(idx) = tone_vowel_index(&chars) else {
        return base;
    };
    match tone_marked(chars[idx], tone as usize) {
        Some(marked) => {
            chars[idx] = marked;
            chars.into_iter().collect()
        }
        None => base,
    }
}

/// `a`/`e` take the mark, then the `o` of `ou`, otherwise the last vowel.
fn tone_vowel_index(chars: &[char]) -> Option<usize> {
    if let Some(i) = chars.iter().position(|c| matches!(c, 'a' | 'A')) {
        return Some(i);
    }
    if let Some(i) = chars.iter().position(|c| matches!(c, 'e' | 'E')) {
        return Some(i);
    }
    if let Some(i) = chars
        .windows(2)
        .position(|w| matches!(w[0], 'o' | 'O') && matches!(w[1], 'u' | 'U'))
    {
        return Some(i);
    }
    chars
        .iter()
        .rposition(|c| matches!(c, 'a' | 'A' | 'e' | 'E' | 'i' | 'I' | 'o' | 'O' | 'u' | 'U' | 'ü' | 'Ü'))
}

fn tone_marked(vowel: char, tone: usize) -> Option<char> {
    let row: [char; 4] = match vowel {
        'a' => ['ā', 'á', 'ǎ', 'à'],
        'A' => ['Ā', 'Á', 'Ǎ', 'À'],
        'e' => ['ē', 'é', 'ě', 'è'],
        'E' => ['Ē', 'É', 'Ě', 'È'],
        'i' => ['ī', 'í', 'ǐ', 'ì'],
        'I' => ['Ī', 'Í', 'Ǐ', 'Ì'],
        'o' => ['ō', 'ó', 'ǒ', 'ò'],
        'O' => ['Ō', 'Ó', 'Ǒ', 'Ò'],
        'u' => ['ū', 'ú', 'ǔ', 'ù'],
        'U' => ['Ū', 'Ú', 'Ǔ', 'Ù'],
        'ü' => ['ǖ', 'ǘ', 'ǚ', 'ǜ'],
        'Ü' => ['Ǖ', 'Ǘ', 'Ǚ', 'Ǜ'],
        _ => return None,
    };
    row.get(tone - 1).copied()
}
