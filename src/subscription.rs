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

use crate::error::BrokerError;
use crate::packet::Qos;

/// Subscription set owned by a single session: topic filters with the QoS
/// granted at subscribe time.
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    filters: HashMap<String, Qos>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a subscription. The filter must already be
    /// validated. Returns the granted QoS.
    pub fn insert(&mut self, topic_filter: &str, qos: Qos) -> Qos {
        self.filters.insert(topic_filter.to_string(), qos);
        qos
    }

    /// Remove a subscription; returns whether it existed.
    pub fn remove(&mut self, topic_filter: &str) -> bool {
        self.filters.remove(topic_filter).is_some()
    }

    /// Highest granted QoS among filters matching `topic`, or `None` when
    /// the session is not subscribed to it.
    pub fn matching_qos(&self, topic: &str) -> Option<Qos> {
        self.filters
            .iter()
            .filter(|(filter, _)| topic_matches_filter(filter, topic))
            .map(|(_, qos)| *qos)
            .max()
    }

    pub fn topic_filters(&self) -> Vec<String> {
        let mut filters: Vec<String> = self.filters.keys().cloned().collect();
        filters.sort();
        filters
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

/// Validate an MQTT topic filter: non-empty, `#` only as the final segment,
/// `+` and `#` only as whole segments.
pub fn validate_topic_filter(topic_filter: &str) -> Result<(), BrokerError> {
    if topic_filter.is_empty() {
        return Err(BrokerError::InvalidTopicFilter(topic_filter.to_string()));
    }

    let segment_count = topic_filter.split('/').count();
    for (i, segment) in topic_filter.split('/').enumerate() {
        if segment == "#" {
            // # must be the last segment
            if i != segment_count - 1 {
                return Err(BrokerError::InvalidTopicFilter(topic_filter.to_string()));
            }
        } else if segment != "+" && (segment.contains('+') || segment.contains('#')) {
            return Err(BrokerError::InvalidTopicFilter(topic_filter.to_string()));
        }
    }

    Ok(())
}

/// Match a published topic against a (validated) topic filter.
pub fn topic_matches_filter(topic_filter: &str, topic: &str) -> bool {
    let mut filter_segments = topic_filter.split('/');
    let mut topic_segments = topic.split('/');

    loop {
        match (filter_segments.next(), topic_segments.next()) {
            // Multi-level wildcard matches the rest, including the parent level
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(filter_segment), Some(topic_segment)) if filter_segment == topic_segment => {
                continue
            }
            (None, None) => return true,
            _ => return false,
        }
    }
}
