//! Guest linear memory marshaling with bounds checking.
//!
//! All guest-supplied offsets and lengths are untrusted. Every access
//! validates the range `[ptr, ptr+len)` against the current memory size;
//! violations surface as `AbiError::OutOfBounds`, which the linker turns
//! into a trap.
//!
//! Two wire protocols live here:
//!
//! - **write-if-fits**: compute the required byte count `n`; write only when
//!   `0 < n <= buf_limit`; return `n` either way so the guest can grow its
//!   buffer and retry. `buf_limit == 0` is a legal size query.
//! - **null-terminated list**: items written back-to-back, each followed by
//!   a single NUL; the packed return is `(count << 32) | byte_count` and
//!   nothing is written when `byte_count > buf_limit`.

use http_wasm_abi::codec::pack_count_bytes;
use http_wasm_abi::AbiError;

/// Validate that `[ptr, ptr+len)` lies within memory of the given size.
pub fn validate_range(mem_size: usize, ptr: u32, len: u32) -> Result<(), AbiError> {
    let end = (ptr as usize)
        .checked_add(len as usize)
        .ok_or(AbiError::OutOfBounds {
            ptr,
            len,
            memory: mem_size,
        })?;
    if end > mem_size {
        return Err(AbiError::OutOfBounds {
            ptr,
            len,
            memory: mem_size,
        });
    }
    Ok(())
}

/// Read `len` bytes from guest memory at `ptr`.
pub fn read_bytes(mem: &[u8], ptr: u32, len: u32) -> Result<Vec<u8>, AbiError> {
    validate_range(mem.len(), ptr, len)?;
    Ok(mem[ptr as usize..ptr as usize + len as usize].to_vec())
}

/// Read `len` bytes from guest memory at `ptr` and require UTF-8.
/// `what` names the argument for the trap message.
pub fn read_str(mem: &[u8], ptr: u32, len: u32, what: &'static str) -> Result<String, AbiError> {
    let bytes = read_bytes(mem, ptr, len)?;
    String::from_utf8(bytes).map_err(|_| AbiError::InvalidUtf8(what))
}

/// Write-if-fits: copy `data` to `buf` when it fits within `buf_limit`,
/// returning the required length regardless.
pub fn write_if_fits(
    mem: &mut [u8],
    buf: u32,
    buf_limit: u32,
    data: &[u8],
) -> Result<u32, AbiError> {
    let n = data.len() as u32;
    if n > 0 && n <= buf_limit {
        validate_range(mem.len(), buf, n)?;
        mem[buf as usize..buf as usize + data.len()].copy_from_slice(data);
    }
    Ok(n)
}

/// Null-terminated-list protocol: encode `items` into guest memory and
/// return the packed `(count << 32) | byte_count` result.
pub fn write_null_terminated<I, T>(
    mem: &mut [u8],
    buf: u32,
    buf_limit: u32,
    items: I,
) -> Result<i64, AbiError>
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    let items: Vec<T> = items.into_iter().collect();
    let count = items.len() as u32;
    let byte_count: usize = items.iter().map(|item| item.as_ref().len() + 1).sum();

    if byte_count > 0 && byte_count as u32 <= buf_limit {
        validate_range(mem.len(), buf, byte_count as u32)?;
        let mut at = buf as usize;
        for item in &items {
            let bytes = item.as_ref();
            mem[at..at + bytes.len()].copy_from_slice(bytes);
            mem[at + bytes.len()] = 0;
            at += bytes.len() + 1;
        }
    }

    Ok(pack_count_bytes(count, byte_count as u32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_wasm_abi::codec::pack_count_bytes;

    #[test]
    fn test_validate_range() {
        assert!(validate_range(100, 0, 100).is_ok());
        assert!(validate_range(100, 100, 0).is_ok());
        assert!(validate_range(100, 0, 101).is_err());
        assert!(validate_range(100, 99, 2).is_err());
        // ptr + len overflowing u32 arithmetic must not wrap.
        assert!(validate_range(100, u32::MAX, 2).is_err());
    }

    #[test]
    fn test_read_bytes() {
        let mem = vec![10, 20, 30, 40, 50];
        assert_eq!(read_bytes(&mem, 1, 3).unwrap(), vec![20, 30, 40]);
        assert!(read_bytes(&mem, 3, 3).is_err());
    }

    #[test]
    fn test_read_str_rejects_bad_utf8() {
        let mem = vec![0xFF, 0xFE];
        let err = read_str(&mem, 0, 2, "header name").unwrap_err();
        assert!(err.to_string().contains("header name"));
    }

    #[test]
    fn test_write_if_fits_writes_when_it_fits() {
        let mut mem = vec![0u8; 16];
        let n = write_if_fits(&mut mem, 4, 8, b"hello").unwrap();
        assert_eq!(n, 5);
        assert_eq!(&mem[4..9], b"hello");
    }

    #[test]
    fn test_write_if_fits_size_query() {
        let mut mem = vec![0u8; 16];
        // buf_limit == 0 is a size query; nothing is written.
        let n = write_if_fits(&mut mem, 0, 0, b"hello").unwrap();
        assert_eq!(n, 5);
        assert!(mem.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_write_if_fits_too_small_leaves_memory_untouched() {
        let mut mem = vec![0u8; 16];
        let n = write_if_fits(&mut mem, 0, 3, b"hello").unwrap();
        assert_eq!(n, 5);
        assert!(mem.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_write_if_fits_empty_data() {
        let mut mem = vec![0u8; 4];
        assert_eq!(write_if_fits(&mut mem, 0, 4, b"").unwrap(), 0);
    }

    #[test]
    fn test_write_if_fits_oob_destination() {
        let mut mem = vec![0u8; 4];
        assert!(write_if_fits(&mut mem, 2, 8, b"hello").is_err());
    }

    #[test]
    fn test_null_terminated_list_layout() {
        let mut mem = vec![0u8; 32];
        let packed = write_null_terminated(&mut mem, 0, 32, [b"a".as_ref(), b"bc".as_ref()]).unwrap();
        assert_eq!(packed, pack_count_bytes(2, 5));
        assert_eq!(&mem[..5], b"a\0bc\0");
    }

    #[test]
    fn test_null_terminated_list_does_not_write_when_too_small() {
        let mut mem = vec![0u8; 32];
        let packed = write_null_terminated(&mut mem, 0, 4, [b"a".as_ref(), b"bc".as_ref()]).unwrap();
        // Size information still comes back; memory stays untouched.
        assert_eq!(packed, pack_count_bytes(2, 5));
        assert!(mem.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_null_terminated_list_empty() {
        let mut mem = vec![0u8; 8];
        let packed = write_null_terminated(&mut mem, 0, 8, std::iter::empty::<&[u8]>()).unwrap();
        assert_eq!(packed, 0);
    }

    #[test]
    fn test_null_terminated_encoding_identity() {
        // count + sum(item lens) == byte_count, per the protocol.
        let items = [b"alpha".as_ref(), b"beta".as_ref(), b"x".as_ref()];
        let mut mem = vec![0u8; 64];
        let packed = write_null_terminated(&mut mem, 0, 64, items).unwrap() as u64;
        let count = (packed >> 32) as u32;
        let byte_count = (packed & 0xFFFF_FFFF) as u32;
        let item_lens: u32 = items.iter().map(|i| i.len() as u32).sum();
        assert_eq!(byte_count, item_lens + count);
    }
}
