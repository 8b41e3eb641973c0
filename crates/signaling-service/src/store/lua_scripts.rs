//! Lua scripts for membership mutations that must check-then-write atomically.
//!
//! Redis runs a script without interleaving other commands, so the checks
//! and the writes in each script see one consistent snapshot.

/// Register a peer if the session is active and below capacity.
///
/// Peer-set members whose record has expired are pruned before counting, so
/// stale ids never hold a slot. The peer hash and the peer-set never outlive
/// the session: both TTLs are capped at the session's remaining life.
///
/// Pruning reads `peer:{id}` keys that are not declared in KEYS, so this
/// assumes a single Redis node and is not Redis Cluster safe.
///
/// Arguments:
/// - KEYS[1]: Session hash (`session:{id}`)
/// - KEYS[2]: Peer-set (`session:{id}:peers`)
/// - KEYS[3]: Peer hash (`peer:{peer_id}`)
/// - ARGV[1]: Peer id
/// - ARGV[2]: Peer TTL in seconds
/// - ARGV[3]: Session TTL in seconds (applied to the peer-set)
/// - ARGV[4]: Peer key prefix (`peer:`)
/// - ARGV[5..]: Peer hash field/value pairs
///
/// Returns:
/// - 1: Peer added
/// - 0: Session full
/// - -1: Session not found
/// - -2: Session closed
/// - -3: Session record corrupt (no numeric `max_peers`)
pub const ADD_PEER: &str = r"
local status = redis.call('HGET', KEYS[1], 'status')
if not status then
    return -1
end
if status == 'closed' then
    return -2
end

local max_peers = tonumber(redis.call('HGET', KEYS[1], 'max_peers'))
if max_peers == nil then
    return -3
end

local count = 0
for _, id in ipairs(redis.call('SMEMBERS', KEYS[2])) do
    if redis.call('EXISTS', ARGV[4] .. id) == 1 then
        count = count + 1
    else
        redis.call('SREM', KEYS[2], id)
    end
end
if count >= max_peers then
    return 0
end

redis.call('DEL', KEYS[3])
for i = 5, #ARGV, 2 do
    redis.call('HSET', KEYS[3], ARGV[i], ARGV[i + 1])
end
redis.call('SADD', KEYS[2], ARGV[1])

local peer_ms = tonumber(ARGV[2]) * 1000
local set_ms = tonumber(ARGV[3]) * 1000
local session_ms = redis.call('PTTL', KEYS[1])
if session_ms > 0 then
    peer_ms = math.min(peer_ms, session_ms)
    set_ms = math.min(set_ms, session_ms)
end
redis.call('PEXPIRE', KEYS[3], peer_ms)
redis.call('PEXPIRE', KEYS[2], set_ms)
return 1
";

/// Update a peer's status and refresh its TTL, only if the record exists.
///
/// A peer whose session is gone is deleted instead. The refreshed TTL is
/// capped at the session's remaining life.
///
/// Arguments:
/// - KEYS[1]: Peer hash (`peer:{peer_id}`)
/// - KEYS[2]: Owning session hash (`session:{id}`)
/// - ARGV[1]: New status
/// - ARGV[2]: Peer TTL in seconds
///
/// Returns:
/// - 1: Updated
/// - 0: Peer not found
pub const UPDATE_PEER_STATUS: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return 0
end
if redis.call('EXISTS', KEYS[2]) == 0 then
    redis.call('DEL', KEYS[1])
    return 0
end

local peer_ms = tonumber(ARGV[2]) * 1000
local session_ms = redis.call('PTTL', KEYS[2])
if session_ms > 0 then
    peer_ms = math.min(peer_ms, session_ms)
end
redis.call('HSET', KEYS[1], 'status', ARGV[1])
redis.call('PEXPIRE', KEYS[1], peer_ms)
return 1
";

/// Close a session: set status, unmap its room code, drop it from the
/// active index.
///
/// The room-code mapping is only deleted while it still points at this
/// session. The session keeps its remaining TTL.
///
/// Arguments:
/// - KEYS[1]: Session hash (`session:{id}`)
/// - KEYS[2]: Active-session index (`session:active`)
/// - ARGV[1]: Session id
/// - ARGV[2]: Room-code key prefix (`roomcode:`)
///
/// Returns:
/// - 1: Closed (or already closed)
/// - 0: Session not found
pub const CLOSE_SESSION: &str = r"
local status = redis.call('HGET', KEYS[1], 'status')
if not status then
    return 0
end

if status ~= 'closed' then
    local code = redis.call('HGET', KEYS[1], 'room_code')
    if code then
        local code_key = ARGV[2] .. code
        if redis.call('GET', code_key) == ARGV[1] then
            redis.call('DEL', code_key)
        end
    end
    redis.call('HSET', KEYS[1], 'status', 'closed')
end

redis.call('SREM', KEYS[2], ARGV[1])
return 1
";

/// Delete a session with its peers, peer-set, active entry and room code.
///
/// Reading the peer-set and deleting its members happens in one step, so a
/// peer added concurrently is either deleted here or rejected as not found.
/// The room-code mapping is only deleted while it still points at this
/// session. Peer hashes are not declared in KEYS, so this assumes a single
/// Redis node.
///
/// Arguments:
/// - KEYS[1]: Session hash (`session:{id}`)
/// - KEYS[2]: Peer-set (`session:{id}:peers`)
/// - KEYS[3]: Active-session index (`session:active`)
/// - ARGV[1]: Session id
/// - ARGV[2]: Room-code key prefix (`roomcode:`)
/// - ARGV[3]: Peer key prefix (`peer:`)
///
/// Returns:
/// - n >= 0: Deleted, with n peer-set members removed
/// - -1: Session not found
pub const DELETE_SESSION: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return -1
end

local code = redis.call('HGET', KEYS[1], 'room_code')
if code then
    local code_key = ARGV[2] .. code
    if redis.call('GET', code_key) == ARGV[1] then
        redis.call('DEL', code_key)
    end
end

local members = redis.call('SMEMBERS', KEYS[2])
for _, id in ipairs(members) do
    redis.call('DEL', ARGV[3] .. id)
end
redis.call('DEL', KEYS[1], KEYS[2])
redis.call('SREM', KEYS[3], ARGV[1])
return #members
";
