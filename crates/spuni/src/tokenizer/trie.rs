//! Longest-match text splitter over the registered token set.
//!
//! The trie is a derived index: it is rebuilt from the no-split token list
//! whenever tokens are added, and never serialized. `split` walks the text
//! once, tracking every partial match by its starting character position.
//! When a match completes, a lookahead pass checks whether an earlier or
//! longer match should win before the cut is committed, so `<extra_id_100>`
//! beats `<extra_id_1>` and an earlier start beats a later one.

use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Default)]
struct TrieNode {
    children: HashMap<char, TrieNode>,
    terminal: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Trie {
    root: TrieNode,
}

impl Trie {
    pub fn new() -> Self {
        Trie::default()
    }

    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut trie = Trie::new();
        for token in tokens {
            trie.add(token.as_ref());
        }
        trie
    }

    /// Register a word. Empty words are ignored.
    pub fn add(&mut self, word: &str) {
        if word.is_empty() {
            return;
        }
        let mut node = &mut self.root;
        for ch in word.chars() {
            node = node.children.entry(ch).or_default();
        }
        node.terminal = true;
    }

    /// Cut `text` into alternating unmatched spans and registered words.
    ///
    /// Concatenating the returned slices always reproduces `text` exactly.
    /// Unmatched stretches come back as single chunks, registered words as
    /// their own chunks, and matching is greedy with two tie-breaks: the
    /// earliest starting match wins, and among matches with the same start
    /// the longest wins.
    pub fn split<'a>(&self, text: &'a str) -> Vec<&'a str> {
        let chars: Vec<char> = text.chars().collect();
        // Cursor state is tracked in character positions; this maps them
        // back to byte offsets for slicing.
        let byte_pos: Vec<usize> = text.char_indices().map(|(b, _)| b).collect();

        // Live partial matches keyed by their starting position, kept in
        // ascending start order.
        let mut states: BTreeMap<usize, &TrieNode> = BTreeMap::new();
        let mut offsets: Vec<usize> = vec![0];
        let mut skip = 0usize;

        for (current, &current_char) in chars.iter().enumerate() {
            // A committed lookahead already consumed up to `skip`.
            if current < skip {
                continue;
            }

            let mut to_remove: Vec<usize> = Vec::new();
            let mut reset = false;

            let starts: Vec<usize> = states.keys().copied().collect();
            for start_key in starts {
                let node = match states.get(&start_key) {
                    Some(&node) => node,
                    None => continue,
                };
                if node.terminal {
                    // A finished match. Before committing, scan earlier and
                    // equal starts for a match that starts sooner or runs
                    // longer. States with a smaller start were already
                    // advanced through `current_char` this round, so their
                    // continuation begins one character later.
                    let mut m_start = start_key;
                    let mut m_end = current;
                    for (&lookstart, &look_entry) in states.iter() {
                        if lookstart > m_start {
                            break;
                        }
                        let mut lookahead_index = if lookstart < m_start {
                            current + 1
                        } else {
                            current
                        };
                        let mut look_node = look_entry;
                        if look_node.terminal {
                            m_start = lookstart;
                            m_end = lookahead_index;
                            skip = lookahead_index;
                        }
                        loop {
                            let next_char = match chars.get(lookahead_index) {
                                Some(&c) => c,
                                None => break,
                            };
                            look_node = match look_node.children.get(&next_char) {
                                Some(child) => child,
                                None => break,
                            };
                            lookahead_index += 1;
                            if look_node.terminal {
                                m_start = lookstart;
                                m_end = lookahead_index;
                                skip = lookahead_index;
                            }
                        }
                    }
                    offsets.push(m_start);
                    offsets.push(m_end);
                    reset = true;
                    break;
                } else if let Some(child) = node.children.get(&current_char) {
                    // Partial match grows by one character.
                    states.insert(start_key, child);
                } else {
                    // Dead cursor. Removal is deferred so the lookahead
                    // above still sees it.
                    to_remove.push(start_key);
                }
            }

            if reset {
                states.clear();
            } else {
                for start_key in to_remove {
                    states.remove(&start_key);
                }
            }

            if current >= skip {
                if let Some(child) = self.root.children.get(&current_char) {
                    states.insert(current, child);
                }
            }
        }

        // A match can still be in flight when the text ends; the earliest
        // start wins.
        for (&start, &node) in states.iter() {
            if node.terminal {
                offsets.push(start);
                offsets.push(chars.len());
                break;
            }
        }

        Self::cut_text(text, offsets, &byte_pos, chars.len())
    }

    fn cut_text<'a>(
        text: &'a str,
        mut offsets: Vec<usize>,
        byte_pos: &[usize],
        char_len: usize,
    ) -> Vec<&'a str> {
        let byte_at = |pos: usize| -> usize {
            if pos >= char_len {
                text.len()
            } else {
                byte_pos[pos]
            }
        };

        offsets.push(char_len);
        let mut tokens = Vec::new();
        let mut start = 0usize;
        for end in offsets {
            if start > end {
                log::error!(
                    "trie split produced offsets out of order ({} > {}), skipping the pair",
                    start,
                    end
                );
                continue;
            } else if start == end {
                continue;
            }
            tokens.push(&text[byte_at(start)..byte_at(end)]);
            start = end;
        }
        tokens
    }
}
