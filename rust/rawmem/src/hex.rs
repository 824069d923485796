//! Diagnostic hex rendering of a view.

use std::{fmt::Write, sync::Arc};

use rawmem_common::Result;

use crate::memory::Memory;

fn identity<T: ?Sized>(arc: Option<&Arc<T>>) -> String {
    arc.map_or_else(
        || "none".to_string(),
        |a| format!("{:p}", Arc::as_ptr(a) as *const ()),
    )
}

impl Memory {
    /// Renders `[offset, offset + length)` as rows of eight hex bytes, preceded by `header`
    /// and the addressing fields of this view's descriptor.
    ///
    /// Each row starts with the view offset of its first byte, right-aligned to 20 columns.
    pub fn to_hex_string(&self, header: &str, offset: u64, length: u64) -> Result<String> {
        let state = &*self.state;
        state.check_valid_and_bounds(offset, length)?;

        let heap = state
            .backing()
            .heap()
            .map(|a| format!("{a:?}, {}", identity(Some(a))));
        let mut s = String::new();
        let _ = writeln!(s, "{header}");
        let _ = writeln!(s, "Native base address : {}", state.native_base_address());
        let _ = writeln!(s, "Heap array          : {}", heap.as_deref().unwrap_or("none"));
        let _ = writeln!(s, "Heap header         : {}", state.heap_header());
        let _ = writeln!(
            s,
            "External buffer     : {}",
            identity(state.backing().external())
        );
        let _ = writeln!(s, "Region offset       : {}", state.region_offset());
        let _ = writeln!(s, "Capacity            : {}", state.capacity());
        let _ = writeln!(s, "Cumulative offset   : {}", state.cumulative_offset());
        let _ = writeln!(
            s,
            "Request server      : {}",
            identity(state.request_server())
        );
        let _ = writeln!(s, "Valid               : {}", state.is_valid());
        let _ = writeln!(s, "Read only           : {}", state.is_read_only());
        let _ = writeln!(s, "Byte order          : {}", state.byte_order());
        s.push_str("Data                :  0  1  2  3  4  5  6  7");

        let bytes = unsafe {
            std::slice::from_raw_parts(state.address(offset), length as usize)
        };
        for (row, chunk) in bytes.chunks(8).enumerate() {
            let _ = write!(s, "\n{:>20}: ", offset + row as u64 * 8);
            for b in chunk {
                let _ = write!(s, "{b:02x} ");
            }
        }
        s.push('\n');
        Ok(s)
    }
}

#[cfg(test)]
mod tests {
    use crate::memory::{Memory, WritableMemory};

    #[test]
    fn test_rows() {
        let mem = Memory::wrap((0..20u8).collect::<Vec<_>>());
        let s = mem.to_hex_string("dump", 2, 10).unwrap();
        assert!(s.starts_with("dump\n"));
        assert!(s.contains("Capacity            : 20\n"));
        assert!(s.contains("Heap array          : [u8; 20], 0x"));
        assert!(s.contains("Read only           : true\n"));
        let rows: Vec<&str> = s.lines().skip_while(|l| !l.starts_with("Data")).skip(1).collect();
        assert_eq!(
            rows,
            [
                "                   2: 02 03 04 05 06 07 08 09 ",
                "                  10: 0a 0b ",
            ]
        );
    }

    #[test]
    fn test_native_fields() {
        let handle = WritableMemory::allocate(16).unwrap();
        let region = handle.region(4, 8).unwrap();
        let s = region.to_hex_string("native", 0, 0).unwrap();
        assert!(s.contains(&format!("Native base address : {}\n", handle.cumulative_offset(0))));
        assert!(s.contains("Region offset       : 4\n"));
        assert!(s.contains("Heap array          : none\n"));
        assert!(!s.contains("Request server      : none"));
        assert!(s.ends_with("6  7\n"));

        assert!(region.to_hex_string("x", 4, 5).unwrap_err().is_out_of_range());
        handle.close();
        assert!(region.to_hex_string("x", 0, 1).unwrap_err().is_invalid_resource());
    }
}
