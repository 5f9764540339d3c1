/*!

This is the long-form manual for `poll_flow` and `vota_facil`.

## How a vote goes

Each visitor gets a session. Pressing an option opens a confirmation
dialog showing the option's description. Confirming appends one row
`(timestamp, option)` to the vote store; choosing another option closes
the dialog without writing anything. After a vote, the same session cannot
vote again until the cooldown (10 seconds by default) has passed: the
option buttons are disabled and the page shows the seconds left.

The partial results under the buttons are recounted from every row of the
store each time the page is shown. Rows written by other sessions a moment
earlier may not be visible yet.

## Configuration file

`vota_facil` reads one JSON file, from the path in the `VOTA_FACIL_CONFIG`
environment variable (`vota_facil.json` if unset).

```json
{
  "title": "Name the project",
  "options": [
    { "name": "Alumia", "description": "First proposal" },
    { "name": "Lumia", "description": "Second proposal" },
    { "name": "Luzia", "description": "Third proposal" }
  ],
  "cooldownSeconds": 10,
  "shareUrl": "http://localhost:8501",
  "bindAddress": "0.0.0.0:8501",
  "store": {
    "provider": "sheets",
    "spreadsheetId": "1AbC...",
    "range": "A:B",
    "credentialsPath": "service_account.json"
  }
}
```

### `store`

* `provider`: `sheets` (Google Sheets) or `memory` (votes kept in the
  process, lost on exit).
* `spreadsheetId`: the identifier in the spreadsheet's URL.
* `range`: the columns holding the rows, `A:B` by default. A header row is
  recognised because its first cell is not a timestamp, and skipped.
* `credentialsPath`: a Google service account key file (JSON). The path is
  relative to the configuration file.
* `accessToken`: an OAuth access token to use instead of a service account.

## Quick start with Google Sheets

1. Create a spreadsheet and write `timestamp` and `option` in `A1` and `B1`.
2. Create a service account in a Google Cloud project with the Sheets API
   enabled, and download a JSON key for it.
3. Share the spreadsheet with the service account's e-mail address, with
   edit rights.
4. Point `credentialsPath` at the key file and `spreadsheetId` at the
   spreadsheet, then run:

```bash
VOTA_FACIL_CONFIG=vota_facil.json RUST_LOG=info vota_facil
```

The page is served on `bindAddress`. The QR code encodes `shareUrl`: set it
to the address the public will use.

*/
