//! Splits a generated article into a numbered social-media thread.

use crate::generate::Article;

pub const DEFAULT_POST_LEN: usize = 280;
pub const DEFAULT_MAX_POSTS: usize = 8;

/// Room kept free in every chunk for the `i/n ` prefix.
const NUMBERING_RESERVE: usize = 10;

const MAX_KEY_POINTS: usize = 4;
const MAX_KEY_POINT_POSTS: usize = 2;
const MIN_BODY_PARAGRAPH_CHARS: usize = 100;
const BODY_KEYWORDS: [&str; 5] = ["mining", "bitcoin", "hashrate", "blockchain", "cryptocurrency"];
const DEFAULT_TAGS: [&str; 3] = ["bitcoin", "mining", "cryptocurrency"];

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Sentences end at `.`, `!` or `?` followed by whitespace.
fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut prev_terminal = false;
    for (i, c) in text.char_indices() {
        if c.is_whitespace() && prev_terminal {
            let s = text[start..i].trim();
            if !s.is_empty() {
                out.push(s);
            }
            start = i;
        }
        prev_terminal = matches!(c, '.' | '!' | '?');
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}

fn fits(current: &str, piece: &str, budget: usize) -> bool {
    let sep = usize::from(!current.is_empty());
    char_len(current) + sep + char_len(piece) <= budget
}

fn append(current: &mut String, piece: &str) {
    if !current.is_empty() {
        current.push(' ');
    }
    current.push_str(piece);
}

fn flush(chunks: &mut Vec<String>, current: &mut String) {
    if !current.is_empty() {
        chunks.push(std::mem::take(current));
    }
}

/// Split `text` into chunks of at most `max_len - 10` chars.
///
/// Packs whole sentences first, falls back to words for an over-long sentence, and
/// truncates a single word that still does not fit.
pub fn split_for_thread(text: &str, max_len: usize) -> Vec<String> {
    let budget = max_len.saturating_sub(NUMBERING_RESERVE).max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();

    for sentence in sentences(text) {
        if fits(&current, sentence, budget) {
            append(&mut current, sentence);
            continue;
        }
        flush(&mut chunks, &mut current);
        if char_len(sentence) <= budget {
            current.push_str(sentence);
            continue;
        }
        for word in sentence.split_whitespace() {
            if !fits(&current, word, budget) {
                flush(&mut chunks, &mut current);
            }
            if char_len(word) > budget {
                chunks.push(word.chars().take(budget).collect());
            } else {
                append(&mut current, word);
            }
        }
    }
    flush(&mut chunks, &mut current);
    chunks
}

fn hashtag(tag: &str) -> Option<String> {
    let t: String = tag.chars().filter(|c| c.is_alphanumeric()).collect();
    (!t.is_empty()).then(|| format!("#{t}"))
}

/// Build a numbered thread: opener, key takeaways, informative body paragraphs, closer.
///
/// Never exceeds `max_posts` (at least 2: opener and closer). Posts are prefixed
/// `i/n ` when the thread has more than one post.
pub fn build_thread(article: &Article, max_posts: usize) -> Vec<String> {
    let max_posts = max_posts.max(2);
    let headline = if article.headline.trim().is_empty() {
        "Bitcoin Mining Update"
    } else {
        article.headline.trim()
    };

    let mut posts = vec![format!("🧵 THREAD: {headline}")];
    // Leave the last slot for the closer.
    let body_budget = max_posts - 1;

    if !article.key_points.is_empty() {
        let bullets: Vec<String> = article
            .key_points
            .iter()
            .take(MAX_KEY_POINTS)
            .map(|p| format!("• {}", p.trim()))
            .collect();
        let text = format!("Key takeaways: {}", bullets.join(" "));
        let room = body_budget.saturating_sub(posts.len()).min(MAX_KEY_POINT_POSTS);
        posts.extend(split_for_thread(&text, DEFAULT_POST_LEN).into_iter().take(room));
    }

    let paragraphs: Vec<&str> = article
        .body
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    // Skip the intro and conclusion paragraphs.
    let middle = if paragraphs.len() > 2 {
        &paragraphs[1..paragraphs.len() - 1]
    } else {
        &[][..]
    };
    for para in middle.iter().filter(|p| {
        let lower = p.to_lowercase();
        char_len(p) > MIN_BODY_PARAGRAPH_CHARS && BODY_KEYWORDS.iter().any(|k| lower.contains(k))
    }) {
        let room = body_budget.saturating_sub(posts.len());
        if room == 0 {
            break;
        }
        posts.extend(split_for_thread(para, DEFAULT_POST_LEN).into_iter().take(room));
    }

    let tags: Vec<String> = if article.tags.is_empty() {
        DEFAULT_TAGS.iter().filter_map(|t| hashtag(t)).collect()
    } else {
        article.tags.iter().filter_map(|t| hashtag(t)).take(3).collect()
    };
    posts.push(format!(
        "That's a wrap! 🎯\n\nWhat are your thoughts on these developments in Bitcoin mining?\n\n{}",
        tags.join(" ")
    ));

    let total = posts.len();
    if total == 1 {
        return posts;
    }
    posts
        .into_iter()
        .enumerate()
        .map(|(i, p)| format!("{}/{} {}", i + 1, total, p))
        .collect()
}
