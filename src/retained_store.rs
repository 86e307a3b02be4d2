// MIT License
//
// Copyright (c) 2025 Takatoshi Kondo
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::trace;

use crate::packet::ApplicationMessage;

/// Trie node for retained messages, one level per topic segment.
#[derive(Debug, Default)]
struct RetainedTrieNode {
    /// Retained message at this exact topic name (if any)
    message: Option<ApplicationMessage>,
    /// Child nodes for each segment
    children: HashMap<String, RetainedTrieNode>,
}

/// Retained message store. The dispatch loop updates it after interception
/// accepts a message with the retain flag; subscribes read it back through
/// wildcard-aware matching.
#[derive(Debug)]
pub struct RetainedStore {
    root: RwLock<RetainedTrieNode>,
}

impl RetainedStore {
    pub fn new() -> Self {
        Self {
            root: RwLock::new(RetainedTrieNode::default()),
        }
    }

    /// Store a retained message, replacing any prior one for the topic.
    /// An empty payload removes the retained message instead.
    pub async fn update(&self, sender_client_id: Option<&str>, message: &ApplicationMessage) {
        let mut root = self.root.write().await;
        let segments: Vec<&str> = message.topic.split('/').collect();

        if message.payload.is_empty() {
            if let Some(node) = Self::find_node_mut(&mut root, &segments, 0) {
                if node.message.take().is_some() {
                    trace!(
                        "Removed retained message for topic '{}' (sender: {sender_client_id:?})",
                        message.topic
                    );
                }
            }
            return;
        }

        let node = Self::get_or_create_node(&mut root, &segments, 0);
        node.message = Some(message.clone());
        trace!(
            "Stored retained message for topic '{}' with QoS {:?} (sender: {sender_client_id:?})",
            message.topic,
            message.qos
        );
    }

    /// All retained messages matching a topic filter (with wildcards).
    pub async fn get_matching(&self, topic_filter: &str) -> Vec<ApplicationMessage> {
        let root = self.root.read().await;
        let segments: Vec<&str> = topic_filter.split('/').collect();

        Self::search_matching(&root, &segments, 0)
    }

    /// Recursively get or create a node at the given path
    fn get_or_create_node<'a>(
        node: &'a mut RetainedTrieNode,
        segments: &[&str],
        depth: usize,
    ) -> &'a mut RetainedTrieNode {
        if depth >= segments.len() {
            return node;
        }

        let segment = segments[depth];
        let child = node.children.entry(segment.to_string()).or_default();

        Self::get_or_create_node(child, segments, depth + 1)
    }

    /// Recursively find a node at the given path (mutable)
    fn find_node_mut<'a>(
        node: &'a mut RetainedTrieNode,
        segments: &[&str],
        depth: usize,
    ) -> Option<&'a mut RetainedTrieNode> {
        if depth >= segments.len() {
            return Some(node);
        }

        let segment = segments[depth];
        if let Some(child) = node.children.get_mut(segment) {
            Self::find_node_mut(child, segments, depth + 1)
        } else {
            None
        }
    }

    /// Recursively search for retained messages matching a topic filter
    fn search_matching(
        node: &RetainedTrieNode,
        filter_segments: &[&str],
        depth: usize,
    ) -> Vec<ApplicationMessage> {
        let mut results = Vec::new();

        if depth >= filter_segments.len() {
            if let Some(ref message) = node.message {
                results.push(message.clone());
            }
            return results;
        }

        let segment = filter_segments[depth];

        match segment {
            "#" => {
                // Multi-level wildcard - collect everything from this node down
                Self::collect_all_messages(node, &mut results);
            }
            "+" => {
                // Single-level wildcard - search all children at next depth
                for child in node.children.values() {
                    results.extend(Self::search_matching(child, filter_segments, depth + 1));
                }
            }
            _ => {
                // Exact match - search only matching child
                if let Some(child) = node.children.get(segment) {
                    results.extend(Self::search_matching(child, filter_segments, depth + 1));
                }
            }
        }

        results
    }

    /// Recursively collect all retained messages under a node
    fn collect_all_messages(node: &RetainedTrieNode, results: &mut Vec<ApplicationMessage>) {
        if let Some(ref message) = node.message {
            results.push(message.clone());
        }

        for child in node.children.values() {
            Self::collect_all_messages(child, results);
        }
    }
}

impl Default for RetainedStore {
    fn default() -> Self {
        Self::new()
    }
}
