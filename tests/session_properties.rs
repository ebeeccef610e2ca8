//! Property-based tests for the match session.
//!
//! Exercises the session through arbitrary boards, placement attempts and
//! message orderings and checks the lifecycle invariants still hold.

use proptest::prelude::*;
use seabattle_state::config::SessionConfig;
use seabattle_state::state::{
    Board, Cell, Inbound, Lobby, LocalUser, MatchPhase, MatchSession, Orientation, Outbound,
    Placement, Position, ReadyNotice, SessionAction, ShipId, StartBroadcast, Topic, STANDARD_FLEET,
};

const GRID: usize = 10;

fn lobby() -> Lobby {
    Lobby::new("AB12", "h1", "Ann").with_joiner("j1", "Bo")
}

fn start_msg() -> Inbound {
    Inbound::Start {
        lobby_code: "AB12".into(),
        payload: StartBroadcast {
            player1_id: "h1".into(),
            player1_name: "Ann".into(),
            player2_id: "j1".into(),
            player2_name: "Bo".into(),
        },
    }
}

fn open(user: &str) -> MatchSession {
    let mut session = MatchSession::open("AB12", lobby(), LocalUser::new(user), SessionConfig::default())
        .expect("session opens");
    session.apply(start_msg());
    session
}

/// A full fleet layout: one ship per row, rows shuffled, columns bounded.
fn fleet_layout() -> impl Strategy<Value = Vec<(usize, usize)>> {
    (
        Just((0..GRID).collect::<Vec<_>>()).prop_shuffle(),
        prop::collection::vec(0usize..GRID, STANDARD_FLEET.len()),
    )
        .prop_map(|(rows, cols)| {
            STANDARD_FLEET
                .iter()
                .zip(rows)
                .zip(cols)
                .map(|((kind, row), col)| (row, col.min(GRID - kind.length())))
                .collect()
        })
}

fn place_layout(session: &mut MatchSession, layout: &[(usize, usize)]) {
    for (i, (row, col)) in layout.iter().enumerate() {
        let id = i as ShipId + 1;
        session.select_ship(id).expect("ship selectable");
        session.place_ship(*row, *col).expect("layout is valid");
    }
}

fn ready_notice(actions: &[SessionAction]) -> ReadyNotice {
    actions
        .iter()
        .find_map(|a| match a {
            SessionAction::Publish {
                message: Outbound::Ready(notice),
                ..
            } => Some(notice.clone()),
            _ => None,
        })
        .expect("ready notice published")
}

fn deliver_to(session: &mut MatchSession, name: &str, notice: ReadyNotice) -> Vec<SessionAction> {
    session.apply(Inbound::Ready {
        recipient: name.into(),
        payload: notice,
    })
}

/// Random placement attempt: ship id, anchor, vertical.
fn attempt() -> impl Strategy<Value = (ShipId, usize, usize, bool)> {
    (1u32..=6, 0usize..GRID + 3, 0usize..GRID + 3, any::<bool>())
}

/// Random inbound message, valid or not.
fn inbound() -> impl Strategy<Value = Inbound> {
    let code = prop_oneof![Just("AB12".to_string()), Just("OLD1".to_string())];
    let name = prop_oneof![Just("Ann".to_string()), Just("Bo".to_string())];
    prop_oneof![
        code.clone().prop_map(|lobby_code| Inbound::Leave { lobby_code }),
        code.clone().prop_map(|lobby_code| Inbound::Start {
            lobby_code,
            payload: StartBroadcast {
                player1_id: "h1".into(),
                player1_name: "Ann".into(),
                player2_id: "j1".into(),
                player2_name: "Bo".into(),
            },
        }),
        (code, name).prop_map(|(game_id, recipient)| Inbound::Ready {
            recipient,
            payload: ReadyNotice {
                game_id,
                player_id: "j1".into(),
                player_name: "Bo".into(),
                player_board: Board::new(GRID).to_wire().unwrap_or_default(),
                player_avatar: None,
            },
        }),
    ]
}

proptest! {
    #[test]
    fn prop_readiness_is_commutative(
        ann_layout in fleet_layout(),
        bo_layout in fleet_layout(),
    ) {
        let mut bo = open("j1");
        place_layout(&mut bo, &bo_layout);
        let bo_notice = ready_notice(&bo.mark_ready().unwrap());

        // Local commit first, then the opponent's notice
        let mut local_first = open("h1");
        place_layout(&mut local_first, &ann_layout);
        local_first.mark_ready().unwrap();
        deliver_to(&mut local_first, "Ann", bo_notice.clone());

        // Opponent's notice first, buffered until the local commit
        let mut remote_first = open("h1");
        place_layout(&mut remote_first, &ann_layout);
        deliver_to(&mut remote_first, "Ann", bo_notice);
        remote_first.mark_ready().unwrap();

        let a = local_first.snapshot();
        let b = remote_first.snapshot();
        prop_assert_eq!(a.phase, MatchPhase::InGame);
        prop_assert_eq!(b.phase, MatchPhase::InGame);
        prop_assert_eq!(a.local, b.local);
        prop_assert_eq!(a.opponent, b.opponent);
    }

    #[test]
    fn prop_turn_exclusivity(ann_layout in fleet_layout(), bo_layout in fleet_layout()) {
        let mut ann = open("h1");
        let mut bo = open("j1");
        place_layout(&mut ann, &ann_layout);
        place_layout(&mut bo, &bo_layout);

        let to_bo = ready_notice(&ann.mark_ready().unwrap());
        let to_ann = ready_notice(&bo.mark_ready().unwrap());
        deliver_to(&mut bo, "Bo", to_bo);
        deliver_to(&mut ann, "Ann", to_ann);

        for session in [&ann, &bo] {
            prop_assert_eq!(session.phase(), MatchPhase::InGame);
            prop_assert!(session.local().is_my_turn ^ session.opponent().is_my_turn);
        }
        prop_assert!(ann.local().is_my_turn);
        prop_assert!(!bo.local().is_my_turn);
        prop_assert_eq!(&bo.opponent().board, &ann.local().board);
        prop_assert_eq!(&ann.opponent().board, &bo.local().board);
    }

    #[test]
    fn prop_board_round_trip(attempts in prop::collection::vec(attempt(), 0..20)) {
        let mut board = Board::new(GRID);
        for (id, row, col, vertical) in attempts {
            let kind = STANDARD_FLEET[(id as usize - 1) % STANDARD_FLEET.len()];
            let orientation = if vertical { Orientation::Vertical } else { Orientation::Horizontal };
            let _ = board.place(Placement {
                ship_id: id,
                kind,
                anchor: Position::new(row, col),
                orientation,
            });
        }

        let wire = board.to_wire().unwrap();
        prop_assert_eq!(Board::from_wire(&wire).unwrap(), board);
    }

    #[test]
    fn prop_placement_invariant(attempts in prop::collection::vec(attempt(), 0..30)) {
        let mut session = open("h1");

        for (id, row, col, vertical) in attempts {
            if vertical != (session.orientation() == Orientation::Vertical) {
                session.toggle_orientation().unwrap();
            }
            let before = session.local().board.clone();
            if session.select_ship(id).is_err() {
                prop_assert_eq!(&session.local().board, &before);
                continue;
            }
            if session.place_ship(row, col).is_err() {
                prop_assert_eq!(&session.local().board, &before);
            }
        }

        let local = session.local();
        let board = &local.board;
        let expected: usize = local
            .ships
            .iter()
            .filter(|s| s.is_placed())
            .map(|s| s.length)
            .sum();
        prop_assert_eq!(board.occupied_count(), expected);

        for placement in board.placements() {
            for pos in placement.cells() {
                prop_assert!(pos.is_within(GRID));
                prop_assert_eq!(board.cell(pos), Some(Cell::Occupied(placement.ship_id)));
            }
        }
    }

    #[test]
    fn prop_abort_is_absorbing(
        before in prop::collection::vec(inbound(), 0..5),
        after in prop::collection::vec(inbound(), 0..20),
    ) {
        let mut session = open("h1");
        for msg in before {
            session.apply(msg);
        }
        session.apply(Inbound::Leave { lobby_code: "AB12".into() });
        prop_assert_eq!(session.phase(), MatchPhase::Aborted);

        let frozen = session.snapshot();
        for msg in after {
            prop_assert!(session.apply(msg).is_empty());
        }
        prop_assert!(session.transport_lost().is_empty());
        prop_assert_eq!(session.snapshot(), frozen);
        prop_assert!(session.subscriptions().is_empty());
        prop_assert!(!session.subscriptions().contains(&Topic::leave("AB12")));
    }
}
