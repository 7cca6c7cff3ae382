//! Priority scheduling
//!
//! Computes the bounded priority score assigned to a work item at enqueue
//! time and orders fetched batches at drain time.

use crate::types::{PriorityAttributes, WorkItem};

/// Upper bound for any priority score
pub const MAX_SCORE: i32 = 200;

/// Compute the priority score for a new work item.
///
/// Additive and order-independent; each rule applies once. The discount
/// bonus is a single dimension: the larger threshold supersedes the smaller
/// one rather than stacking. The result is clamped to [0, MAX_SCORE].
pub fn score(base_priority: i32, attrs: &PriorityAttributes) -> i32 {
    let mut total = base_priority * 10;

    if attrs.high_value {
        total += 20;
    }

    if let Some(discount) = attrs.discount_percent {
        if discount > 50.0 {
            total += 25;
        } else if discount > 30.0 {
            total += 15;
        }
    }

    if let Some(urgency) = attrs.urgency_level {
        if urgency >= 8 {
            total += 30;
        }
    }

    if let Some(minutes) = attrs.expires_in_minutes {
        if minutes < 120 {
            total += 20;
        }
    }

    total.clamp(0, MAX_SCORE)
}

/// Order a fetched batch for dispatch: priority score descending, ties
/// broken by creation time ascending so equal-priority older items are
/// never starved.
pub fn order_batch(items: &mut [WorkItem]) {
    items.sort_by(|a, b| {
        b.priority_score
            .cmp(&a.priority_score)
            .then(a.created_at.cmp(&b.created_at))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Channel, WorkItemStatus};
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn create_test_item(priority_score: i32, age_seconds: i64) -> WorkItem {
        let now = Utc::now();
        WorkItem {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            channel: Channel::Email,
            priority_score,
            payload: serde_json::json!({}),
            status: WorkItemStatus::Queued,
            scheduled_for: now,
            created_at: now - Duration::seconds(age_seconds),
            attempts: 0,
        }
    }

    #[test]
    fn test_base_priority_scaling() {
        assert_eq!(score(0, &PriorityAttributes::default()), 0);
        assert_eq!(score(5, &PriorityAttributes::default()), 50);
        assert_eq!(score(10, &PriorityAttributes::default()), 100);
    }

    #[test]
    fn test_high_value_bonus() {
        let attrs = PriorityAttributes {
            high_value: true,
            ..Default::default()
        };
        assert_eq!(score(5, &attrs), 70);
    }

    #[test]
    fn test_discount_thresholds_are_exclusive() {
        // Exactly 30 earns nothing
        let attrs = PriorityAttributes {
            discount_percent: Some(30.0),
            ..Default::default()
        };
        assert_eq!(score(0, &attrs), 0);

        // Just past 30 earns the smaller bonus
        let attrs = PriorityAttributes {
            discount_percent: Some(30.5),
            ..Default::default()
        };
        assert_eq!(score(0, &attrs), 15);

        // Exactly 50 still earns only the smaller bonus
        let attrs = PriorityAttributes {
            discount_percent: Some(50.0),
            ..Default::default()
        };
        assert_eq!(score(0, &attrs), 15);

        // Past 50 the larger bonus supersedes, never stacks
        let attrs = PriorityAttributes {
            discount_percent: Some(51.0),
            ..Default::default()
        };
        assert_eq!(score(0, &attrs), 25);
    }

    #[test]
    fn test_urgency_threshold() {
        let attrs = PriorityAttributes {
            urgency_level: Some(7),
            ..Default::default()
        };
        assert_eq!(score(0, &attrs), 0);

        // Exactly 8 qualifies
        let attrs = PriorityAttributes {
            urgency_level: Some(8),
            ..Default::default()
        };
        assert_eq!(score(0, &attrs), 30);
    }

    #[test]
    fn test_expiry_threshold() {
        // Exactly 120 does not qualify
        let attrs = PriorityAttributes {
            expires_in_minutes: Some(120),
            ..Default::default()
        };
        assert_eq!(score(0, &attrs), 0);

        let attrs = PriorityAttributes {
            expires_in_minutes: Some(119),
            ..Default::default()
        };
        assert_eq!(score(0, &attrs), 20);
    }

    #[test]
    fn test_score_clamped_to_bounds() {
        let attrs = PriorityAttributes {
            high_value: true,
            discount_percent: Some(90.0),
            urgency_level: Some(10),
            expires_in_minutes: Some(5),
        };
        assert_eq!(score(100, &attrs), MAX_SCORE);
        assert_eq!(score(-10, &PriorityAttributes::default()), 0);
    }

    #[test]
    fn test_scenario_high_value_urgent() {
        // base 5, high value, urgency 9, no expiry attribute
        let attrs = PriorityAttributes {
            high_value: true,
            urgency_level: Some(9),
            ..Default::default()
        };
        assert_eq!(score(5, &attrs), 100);
    }

    #[test]
    fn test_order_by_score_then_age() {
        let mut items = vec![
            create_test_item(50, 0),
            create_test_item(120, 10),
            create_test_item(80, 5),
        ];
        order_batch(&mut items);

        let scores: Vec<i32> = items.iter().map(|i| i.priority_score).collect();
        assert_eq!(scores, vec![120, 80, 50]);
    }

    #[test]
    fn test_equal_scores_keep_creation_order() {
        let older = create_test_item(80, 1);
        let newer = create_test_item(80, 0);
        let mut items = vec![newer.clone(), older.clone()];
        order_batch(&mut items);

        assert_eq!(items[0].id, older.id);
        assert_eq!(items[1].id, newer.id);
    }
}
