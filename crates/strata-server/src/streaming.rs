//! Chunk streaming to subscribed clients.

use strata_net::{ChunkVoxelData, ConnectionId, ConnectionTable};
use strata_voxel::NETWORK_DIRTY;

use crate::game::GameState;

/// Queue `ChunkVoxelData` for every subscribed ready chunk the client has not
/// received yet or that changed since, then clear network-dirty flags.
///
/// Returns the number of chunk packets queued.
pub fn stream_chunks(connections: &mut ConnectionTable, game: &mut GameState) -> usize {
    let mut outgoing: Vec<(ConnectionId, ChunkVoxelData)> = Vec::new();

    for connection in connections.authenticated_mut() {
        let Some(world) = connection
            .controller()
            .and_then(|c| game.world(&c.world))
        else {
            continue;
        };
        let subscribed: Vec<_> = connection.subscriptions().collect();
        for coord in subscribed {
            let Some(chunk) = world.chunks().get_chunk(coord) else {
                continue;
            };
            if !chunk.is_ready() {
                continue;
            }
            if connection.chunk_sent(coord) && !chunk.has_flag(NETWORK_DIRTY) {
                continue;
            }
            connection.mark_chunk_sent(coord);
            outgoing.push((
                connection.id(),
                ChunkVoxelData {
                    chunk: coord,
                    voxels: chunk.voxels().to_vec(),
                },
            ));
        }
    }

    let queued = outgoing.len();
    for (to, data) in outgoing {
        connections.send(to, data);
    }
    game.clear_network_dirty();
    queued
}
