//! Per-player progress, score and rank derived from a session's answers.
//!
//! Every function here is pure: the same roster and answer set always
//! produce the same standings, regardless of the order answers arrived in.

use std::cmp::Reverse;

use indexmap::IndexMap;
use uuid::Uuid;

use crate::state::session::{Answer, Player};

/// Derived standing of one player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerProgress {
    /// Player identifier.
    pub player_id: Uuid,
    /// Display name.
    pub name: String,
    /// Avatar image URL.
    pub avatar_url: String,
    /// Sum of points across every answer, bonus included.
    pub score: i64,
    /// Number of answers to real questions.
    pub answered_count: u32,
    /// Question the player is on, one based. Exceeds the question count
    /// once the player is done. Display only.
    pub current_question_display: u32,
    /// Whether the player still has questions left.
    pub is_active: bool,
    /// One based position in the ordering that produced this list.
    pub rank: u32,
}

#[derive(Default)]
struct Tally {
    score: i64,
    answered_count: u32,
}

/// Build the live leaderboard for a session.
///
/// Answers from players that are not in `players` are ignored. The result
/// is ordered by [`rank_by_progress`].
pub fn aggregate(players: &[Player], answers: &[Answer], question_count: u32) -> Vec<PlayerProgress> {
    let mut tallies: IndexMap<Uuid, Tally> = players
        .iter()
        .map(|player| (player.id, Tally::default()))
        .collect();

    for answer in answers {
        let Some(tally) = tallies.get_mut(&answer.player_id) else {
            continue;
        };
        tally.score += i64::from(answer.points);
        if answer.is_question() {
            tally.answered_count += 1;
        }
    }

    let progress = players
        .iter()
        .filter_map(|player| {
            let tally = tallies.swap_remove(&player.id)?;
            Some(PlayerProgress {
                player_id: player.id,
                name: player.name.clone(),
                avatar_url: player.avatar_url.clone(),
                score: tally.score,
                answered_count: tally.answered_count,
                current_question_display: tally.answered_count + 1,
                is_active: tally.answered_count < question_count,
                rank: 0,
            })
        })
        .collect();

    rank_by_progress(progress)
}

/// Live leaderboard ordering: answered count descending, then score
/// descending. Ties keep their input order and still get distinct ranks.
pub fn rank_by_progress(mut progress: Vec<PlayerProgress>) -> Vec<PlayerProgress> {
    progress.sort_by_key(|entry| (Reverse(entry.answered_count), Reverse(entry.score)));
    assign_ranks(progress)
}

/// Podium ordering: score descending only.
pub fn rank_by_score(mut progress: Vec<PlayerProgress>) -> Vec<PlayerProgress> {
    progress.sort_by_key(|entry| Reverse(entry.score));
    assign_ranks(progress)
}

/// Whether every player answered every question. False for an empty roster.
pub fn all_players_finished(progress: &[PlayerProgress], question_count: u32) -> bool {
    !progress.is_empty()
        && progress
            .iter()
            .all(|entry| entry.answered_count >= question_count)
}

fn assign_ranks(mut progress: Vec<PlayerProgress>) -> Vec<PlayerProgress> {
    for (position, entry) in progress.iter_mut().enumerate() {
        entry.rank = position as u32 + 1;
    }
    progress
}
