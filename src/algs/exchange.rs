//! Two-stage personalized exchange: sizes first, then payloads.
//!
//! Every rank hands in one buffer per destination (empty buffers are fine)
//! and gets back one buffer per source, in rank order. Stage 1 swaps the
//! byte counts so receivers can size their landing buffer; stage 2 moves the
//! concatenated payloads in a single variable-count all-to-all.

use crate::algs::communicator::Communicator;
use crate::cmfe_error::CmfeError;
use bytes::{Bytes, BytesMut};

/// Personalized all-to-all of byte buffers. `outgoing.len()` must equal
/// `comm.size()`.
pub fn all_to_all_v<C: Communicator + ?Sized>(
    comm: &C,
    outgoing: Vec<Bytes>,
) -> Result<Vec<Bytes>, CmfeError> {
    let size = comm.size();
    if outgoing.len() != size {
        return Err(CmfeError::CommError {
            neighbor: comm.rank(),
            reason: format!("{} outgoing buffers for {size} ranks", outgoing.len()),
        });
    }
    if comm.is_no_comm() {
        return Ok(outgoing);
    }

    // Stage 1: sizes.
    let send_counts: Vec<usize> = outgoing.iter().map(Bytes::len).collect();
    let counts_u64: Vec<u64> = send_counts.iter().map(|&n| n as u64).collect();
    let recv_counts: Vec<usize> = comm
        .all_to_all_counts(&counts_u64)?
        .into_iter()
        .map(|n| n as usize)
        .collect();

    // Stage 2: payloads.
    let mut send = BytesMut::with_capacity(send_counts.iter().sum());
    for buf in &outgoing {
        send.extend_from_slice(buf);
    }
    let received = Bytes::from(comm.all_to_all_bytes(&send, &send_counts, &recv_counts)?);

    let mut out = Vec::with_capacity(size);
    let mut offset = 0;
    for n in recv_counts {
        out.push(received.slice(offset..offset + n));
        offset += n;
    }
    log::trace!(
        "[rank {}] all_to_all_v: sent {} bytes, received {} bytes",
        comm.rank(),
        send.len(),
        offset
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{NoComm, ThreadComm};

    #[test]
    fn serial_exchange_is_identity() {
        let out = all_to_all_v(&NoComm, vec![Bytes::from_static(b"abc")]).unwrap();
        assert_eq!(out, vec![Bytes::from_static(b"abc")]);
    }

    #[test]
    fn wrong_buffer_count_is_an_error() {
        assert!(all_to_all_v(&NoComm, vec![]).is_err());
    }

    #[test]
    fn three_ranks_swap_labelled_buffers() {
        let handles: Vec<_> = ThreadComm::universe(3)
            .into_iter()
            .map(|comm| {
                std::thread::spawn(move || {
                    let me = comm.rank();
                    let outgoing = (0..3)
                        .map(|dst| Bytes::from(vec![me as u8; dst + me]))
                        .collect();
                    (me, all_to_all_v(&comm, outgoing).unwrap())
                })
            })
            .collect();
        for h in handles {
            let (me, got) = h.join().unwrap();
            for (src, buf) in got.iter().enumerate() {
                assert_eq!(buf.len(), me + src);
                assert!(buf.iter().all(|&b| b as usize == src));
            }
        }
    }
}
