use lazy_regex::regex;
use std::collections::HashSet;

/// Azerbaijani letters that customers type interchangeably: each diacritic
/// form paired with its plain Latin look-alike, in both cases. The dotted
/// İ / dotless I pairing follows the alphabet's convention rather than a
/// plain case fold.
const LETTER_PAIRS: &[(char, char)] = &[
    ('ə', 'e'),
    ('e', 'ə'),
    ('Ə', 'E'),
    ('E', 'Ə'),
    ('ö', 'o'),
    ('o', 'ö'),
    ('Ö', 'O'),
    ('O', 'Ö'),
    ('ğ', 'g'),
    ('g', 'ğ'),
    ('Ğ', 'G'),
    ('G', 'Ğ'),
    ('ı', 'i'),
    ('i', 'ı'),
    ('I', 'İ'),
    ('İ', 'I'),
    ('ü', 'u'),
    ('u', 'ü'),
    ('Ü', 'U'),
    ('U', 'Ü'),
    ('ş', 's'),
    ('s', 'ş'),
    ('Ş', 'S'),
    ('S', 'Ş'),
    ('ç', 'c'),
    ('c', 'ç'),
    ('Ç', 'C'),
    ('C', 'Ç'),
];

fn pair_of(c: char) -> Option<char> {
    LETTER_PAIRS
        .iter()
        .find(|(from, _)| *from == c)
        .map(|(_, to)| *to)
}

/// Strips everything that is not an ASCII letter or digit and lower-cases the
/// rest. Product codes are compared in this form on both sides so punctuation
/// and case never matter.
pub fn clean_code(text: &str) -> String {
    text.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Trims and collapses internal whitespace runs to a single space.
pub fn collapse_whitespace(text: &str) -> String {
    regex!(r"\s+").replace_all(text.trim(), " ").into_owned()
}

/// All spellings reachable from `word` by independently swapping every paired
/// letter occurrence with its partner, computed for the original, lower-cased
/// and upper-cased forms and unioned. 2^k strings per form for k paired
/// occurrences; search words are short, so the bound is acceptable.
pub fn expand_letter_variants(word: &str) -> HashSet<String> {
    let mut variants = HashSet::new();
    expand_into(word, &mut variants);
    expand_into(&word.to_lowercase(), &mut variants);
    expand_into(&word.to_uppercase(), &mut variants);
    variants
}

fn expand_into(form: &str, out: &mut HashSet<String>) {
    let mut acc = vec![String::with_capacity(form.len())];
    for c in form.chars() {
        match pair_of(c) {
            Some(partner) => {
                let mut swapped = Vec::with_capacity(acc.len());
                for prefix in &acc {
                    let mut s = prefix.clone();
                    s.push(partner);
                    swapped.push(s);
                }
                for prefix in &mut acc {
                    prefix.push(c);
                }
                acc.extend(swapped);
            }
            None => {
                for prefix in &mut acc {
                    prefix.push(c);
                }
            }
        }
    }
    out.extend(acc);
}
