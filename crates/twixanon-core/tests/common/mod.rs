//! Synthetic twix files for integration tests.

#![allow(dead_code)]

pub const FRAME_OF_REFERENCE: &str = "1.3.12.2.1107.5.2.43.66035.1.20230117120305123.0.0.0";

/// Acquisition data appended after every measurement header
pub const DATA: &[u8] = b"\x10\x20\x30\x40ACQUISITION-DATA\x00\xff";

/// NUL padding after the last buffer
pub const PADDING: usize = 256;

/// `Meas` buffer: XProtocol parameters
pub fn meas_text(patient: &str) -> String {
    format!(
        concat!(
            "<XProtocol> \n",
            "{{\n",
            "  <Name> \"PhoenixMetaProtocol\"\n",
            "  <ParamString.\"PatientName\">  {{ \"{patient}\"  }}\n",
            "  <ParamString.\"PatientID\">  {{ \"12345\"  }}\n",
            "  <ParamString.\"PatientBirthDay\">  {{ \"19800101\"  }}\n",
            "  <ParamLong.\"PatientSex\">  {{ 2  }}\n",
            "  <ParamString.\"InstitutionName\">  {{ \"General Hospital\"  }}\n",
            "  <ParamString.\"FrameOfReference\">  {{ \"{frame}\"  }}\n",
            "  <ParamString.\"SequenceDescription\">  {{ \"t1_mprage_sag\"  }}\n",
            "  <ParamDouble.\"TR\">  {{ <Precision> 16  2300.000000  }}\n",
            "  <ParamDouble.\"FlipAngle\">  {{ <Precision> 6  9.000000  }}\n",
            "  <ParamLong.\"NSlc\">  {{ 176  }}\n",
            "  <ParamString.\"PatientPosition\">  {{ \"HFS\"  }}\n",
            "}}\n",
        ),
        patient = patient,
        frame = FRAME_OF_REFERENCE,
    )
}

/// `MeasYaps` buffer: ASCCONV assignments
pub fn yaps_text(patient: &str) -> String {
    format!(
        concat!(
            "### ASCCONV BEGIN ###\n",
            "ulVersion\t = 0x14b44b6\n",
            "tPatientName = \"\"{patient}\"\"\n",
            "alTR[0]\t = 2300000\n",
            "alTI[0]\t = 900000\n",
            "sPat.lAccelFactPE = 2\n",
            "tReferenceImage0 = \"1.3.12.2.1107.5.2.43.66035.30000023011712034567800000007\"\n",
            "### ASCCONV END ###\n",
        ),
        patient = patient,
    )
}

/// Buffers of a typical measurement
pub fn buffers(patient: &str) -> Vec<(&'static str, Vec<u8>)> {
    vec![
        ("Meas", meas_text(patient).into_bytes()),
        ("MeasYaps", yaps_text(patient).into_bytes()),
    ]
}

/// Builds a measurement (header, padding, data)
pub fn measurement(buffers: &[(&str, Vec<u8>)], padding: usize, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, text) in buffers {
        body.extend_from_slice(name.as_bytes());
        body.push(0);
        body.extend_from_slice(&(text.len() as u32).to_le_bytes());
        body.extend_from_slice(text);
    }
    let header_len = 8 + body.len() + padding;
    let mut out = (header_len as u32).to_le_bytes().to_vec();
    out.extend_from_slice(&(buffers.len() as u32).to_le_bytes());
    out.extend_from_slice(&body);
    out.resize(header_len, 0);
    out.extend_from_slice(data);
    out
}

/// A VB file for `patient`
pub fn vb_file(patient: &str) -> Vec<u8> {
    measurement(&buffers(patient), PADDING, DATA)
}

/// A VD file with the given raid patient name and measurements
pub fn vd_file_with(raid_patient: &[u8], measurements: &[Vec<u8>]) -> Vec<u8> {
    let count = measurements.len();
    let preamble_len = 8 + 152 * count + 64;

    let mut out = 0u32.to_le_bytes().to_vec();
    out.extend_from_slice(&(count as u32).to_le_bytes());

    let mut offset = preamble_len as u64;
    for (i, meas) in measurements.iter().enumerate() {
        out.extend_from_slice(&(100 + i as u32).to_le_bytes());
        out.extend_from_slice(&(2000 + i as u32).to_le_bytes());
        out.extend_from_slice(&offset.to_le_bytes());
        out.extend_from_slice(&(meas.len() as u64).to_le_bytes());
        out.extend_from_slice(&fixed(raid_patient, 64));
        out.extend_from_slice(&fixed(b"t1_mprage_sag", 64));
        offset += meas.len() as u64;
    }
    out.resize(preamble_len, 0);

    for meas in measurements {
        out.extend_from_slice(meas);
    }
    out
}

/// A VD file with `count` identical measurements for `patient`
pub fn vd_file(patient: &str, count: usize) -> Vec<u8> {
    let measurements: Vec<Vec<u8>> = (0..count)
        .map(|_| measurement(&buffers(patient), PADDING, DATA))
        .collect();
    vd_file_with(patient.as_bytes(), &measurements)
}

fn fixed(value: &[u8], width: usize) -> Vec<u8> {
    let mut out = value.to_vec();
    out.resize(width, 0);
    out
}

/// Returns true if `needle` occurs anywhere in `haystack`
pub fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}
